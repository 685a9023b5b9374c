//! Typed request/response models for the filesystem operations.
//!
//! Requests deserialize from the `args` of a [`crate::task::TaskCommand`];
//! structured responses serialize into the task result string as
//! `{"output": ...}` JSON.

use serde::{Deserialize, Serialize};

/// Wrapper giving every structured response its `output` envelope.
#[derive(Debug, Serialize)]
pub struct Output<T> {
    pub output: T,
}

/// Metadata for one file, directory or symlink.
///
/// `user` and `group` are numeric uid/gid strings; name resolution
/// belongs to the facility adapter, not this subsystem.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct File {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub link_target: Option<String>,
    pub user: String,
    pub group: String,
    /// `rwxr-xr-x`-style permission string.
    pub permissions: String,
    pub last_modified: String,
    pub size: String,
}

#[derive(Debug, Serialize)]
pub struct FileChecksum {
    pub checksum: String,
}

/// Raw stat fields, numeric throughout.
#[derive(Debug, Serialize)]
pub struct FileStat {
    pub mode: u32,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: i64,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(Debug, Deserialize)]
pub struct ChmodRequest {
    pub path: String,
    /// Octal mode string, e.g. "755".
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct ChownRequest {
    pub path: String,
    pub owner: u32,
    pub group: u32,
}

#[derive(Debug, Deserialize)]
pub struct MakeDirRequest {
    pub path: String,
    /// Create missing parents (`mkdir -p`).
    #[serde(default)]
    pub parent: bool,
}

#[derive(Debug, Deserialize)]
pub struct SymlinkRequest {
    /// Existing file the link will point at.
    pub path: String,
    /// Where the link itself is created.
    pub link_path: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Gzip,
    Bzip2,
    Xz,
}

impl CompressionType {
    /// The `tar` mode flag for creating an archive of this type.
    pub fn create_flag(self) -> &'static str {
        match self {
            CompressionType::Gzip => "-czf",
            CompressionType::Bzip2 => "-cjf",
            CompressionType::Xz => "-cJf",
        }
    }

    /// The `tar` mode flag for extracting an archive of this type.
    pub fn extract_flag(self) -> &'static str {
        match self {
            CompressionType::Gzip => "-xzf",
            CompressionType::Bzip2 => "-xjf",
            CompressionType::Xz => "-xJf",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompressRequest {
    pub path: String,
    pub target_path: String,
    pub compression: CompressionType,
    #[serde(default)]
    pub dereference: bool,
    #[serde(default)]
    pub match_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub path: String,
    pub target_path: String,
    /// `None` lets tar detect the format (`-xf`).
    #[serde(default)]
    pub compression: Option<CompressionType>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub path: String,
    pub target_path: String,
}

#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    pub path: String,
    pub target_path: String,
    #[serde(default)]
    pub dereference: bool,
}
