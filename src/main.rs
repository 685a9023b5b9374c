mod config;
mod dispatch;
mod fsops;
mod models;
mod sandbox;
mod task;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::models::{Resource, User};
use crate::sandbox::Sandbox;
use crate::task::{TaskCommand, TaskQueue};

/// Give up on the demo scenario if tasks have not settled by then.
const DEMO_DEADLINE: Duration = Duration::from_secs(60);

fn print_help() {
    println!(
        "\
iri-taskd v{}

Sandboxed filesystem task runner for research-facility APIs.

USAGE:
    iri-taskd [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/iri-taskd.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, iri_taskd=debug,warn)

EXAMPLES:
    iri-taskd                          # uses config/iri-taskd.toml
    iri-taskd /etc/iri/taskd.toml      # custom config path
    RUST_LOG=debug iri-taskd           # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("iri-taskd v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("iri_taskd=info")),
        )
        .init();

    // Load configuration; an explicit path must exist, the default
    // path falls back to built-in defaults
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(&path)?
        }
        None => {
            let default_path = "config/iri-taskd.toml";
            if std::path::Path::new(default_path).exists() {
                info!("Loading configuration from {default_path}");
                Config::load(default_path)?
            } else {
                info!("No configuration file, using defaults");
                Config::default()
            }
        }
    };

    let sandbox = Arc::new(Sandbox::open(&config.sandbox.root)?);
    info!("Sandbox root: {}", sandbox.root().display());
    info!(
        "Queue: poll delay {}s, retention {}s",
        config.queue.poll_delay_secs, config.queue.retention_secs
    );

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(fsops::router(sandbox.clone()));
    let queue = TaskQueue::new(
        dispatcher,
        config.queue.poll_delay(),
        config.queue.retention(),
    );

    // Seed a file clients can poke at, like a fresh facility sandbox
    tokio::fs::write(sandbox.root().join("test.txt"), "hello world").await?;

    // ── Demo scenario ──────────────────────────────────────────────
    // There is no transport in this subsystem; drive the queue the way
    // a facility API would: submit, then poll until terminal.
    let user = User::new("gtorok", "Gabor Torok");
    let resource = Resource::new("cfs");

    let submitted = vec![
        queue
            .submit(
                &user,
                &resource,
                command(
                    "mkdir",
                    serde_json::json!({"request_model": {"path": "demo/a", "parent": true}}),
                ),
            )
            .await,
        queue
            .submit(
                &user,
                &resource,
                command("checksum", serde_json::json!({"path": "test.txt"})),
            )
            .await,
        // Rejected by the sandbox: lands in `failed`
        queue
            .submit(
                &user,
                &resource,
                command("rm", serde_json::json!({"path": "../../etc"})),
            )
            .await,
    ];
    info!("Submitted tasks: {}", submitted.join(", "));

    let started = Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
        }

        let tasks = queue.list(&user).await;
        if tasks.iter().all(|t| t.status.is_terminal()) {
            for t in &tasks {
                info!(
                    "{} -> {:?}: {}",
                    t.id,
                    t.status,
                    t.result.as_deref().unwrap_or("(no result)")
                );
            }
            info!("All tasks settled, exiting");
            return Ok(());
        }

        if started.elapsed() > DEMO_DEADLINE {
            warn!("Tasks did not settle within {DEMO_DEADLINE:?}, exiting");
            return Ok(());
        }
    }
}

fn command(operation: &str, args: serde_json::Value) -> TaskCommand {
    TaskCommand::new(
        "filesystem",
        operation,
        args.as_object().cloned().unwrap_or_default(),
    )
}
