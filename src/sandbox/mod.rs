//! Path sandbox — confines every client-supplied path to one root.
//!
//! Clients of the facility API hand us relative paths. The two ways such
//! a path can escape the sandbox are `..` segments and symlink
//! indirection, so containment is always checked on the *canonicalized*
//! path, never on the raw string.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Rejection raised by [`Sandbox::resolve`].
///
/// `PathEscape` and `UnsafeSymlink` are security rejections, distinct
/// from ordinary operation failures: handlers surface them verbatim so
/// callers can tell "operation failed" from "operation was refused".
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path outside sandbox: {0}")]
    PathEscape(String),
    #[error("Absolute symlink not allowed: {0}")]
    UnsafeSymlink(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A single confinement directory, established once per process.
///
/// The root is created if absent and canonicalized up front, so every
/// containment check compares canonical paths on both sides.
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Opens (creating if necessary) the sandbox root.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        debug!("Sandbox root: {}", root.display());
        Ok(Self { root })
    }

    /// The canonical sandbox root. Handlers that delete must refuse
    /// this path explicitly (`resolve` itself permits operations on
    /// the root directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a client-supplied relative path to a canonical absolute
    /// path inside the sandbox.
    ///
    /// The target does not have to exist yet: the existing prefix is
    /// resolved through the filesystem (symlinks included), missing
    /// trailing components lexically — realpath(3) semantics, so that
    /// `mkdir a/b` can validate its destination before creating it.
    ///
    /// With `allow_symlinks = false`, a path that is itself a symlink
    /// with an absolute link target is refused outright, before any
    /// containment verdict: an absolute target could point anywhere.
    /// With `allow_symlinks = true`, a symlink is trusted even when its
    /// canonical target lies outside the root — an explicit opt-in for
    /// links the facility placed there on purpose.
    pub fn resolve(
        &self,
        relative_path: &str,
        allow_symlinks: bool,
    ) -> Result<PathBuf, SandboxError> {
        let joined = self.root.join(relative_path);

        let is_link = std::fs::symlink_metadata(&joined)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        if !allow_symlinks && is_link {
            let target = std::fs::read_link(&joined)?;
            if target.is_absolute() {
                warn!(
                    "Refusing absolute symlink {relative_path} -> {}",
                    target.display()
                );
                return Err(SandboxError::UnsafeSymlink(relative_path.to_string()));
            }
        }

        let real_path = realpath(&joined);
        if real_path.starts_with(&self.root) {
            return Ok(real_path);
        }

        // Out of root: permitted only through an explicit symlink with
        // allow_symlinks set. A raw `..` escape is never permitted.
        if allow_symlinks && is_link {
            debug!(
                "Symlink {relative_path} leaves the sandbox (opt-in): {}",
                real_path.display()
            );
            return Ok(real_path);
        }

        warn!(
            "Rejecting path {relative_path}: resolves to {}",
            real_path.display()
        );
        Err(SandboxError::PathEscape(relative_path.to_string()))
    }
}

/// realpath(3)-style resolution that tolerates missing trailing
/// components: each component that exists is canonicalized through the
/// filesystem, the rest (including `.` and `..`) is folded lexically.
fn realpath(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => resolved.push(prefix.as_os_str()),
            Component::RootDir => resolved.push(std::path::MAIN_SEPARATOR_STR),
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping at "/" stays at "/" — same as realpath.
                resolved.pop();
            }
            Component::Normal(part) => {
                resolved.push(part);
                if let Ok(canonical) = resolved.canonicalize() {
                    resolved = canonical;
                }
            }
        }
    }
    resolved
}
