use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Confinement root for all filesystem operations.
    /// Created at startup if absent. Supports ${ENV_VAR} substitution.
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Minimum age (seconds) before a task advances a state
    /// (pending→active, then active→dispatch). Models queue latency.
    #[serde(default = "default_poll_delay_secs")]
    pub poll_delay_secs: u64,
    /// How long (seconds) terminal tasks stay visible before pruning.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("./iri_sandbox")
}

fn default_poll_delay_secs() -> u64 {
    5
}

fn default_retention_secs() -> u64 {
    300
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: default_sandbox_root(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_delay_secs: default_poll_delay_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl QueueConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${IRI_SANDBOX_ROOT}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
