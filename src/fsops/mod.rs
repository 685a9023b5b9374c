//! Filesystem operation handlers — the "filesystem" router.
//!
//! Every operation resolves its client-supplied path(s) through the
//! [`Sandbox`] before touching storage; nothing in this module opens a
//! path that has not been validated. Archive operations shell out to
//! `tar` (the one thing Rust should not re-implement here); everything
//! else uses `tokio::fs`.

pub mod models;

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tracing::debug;

use crate::dispatch::{args_into, request_model, Operation, OperationContext, Router};
use crate::sandbox::Sandbox;
use models::{
    ChmodRequest, ChownRequest, CompressRequest, CopyRequest, ExtractRequest, File,
    FileChecksum, FileStat, MakeDirRequest, MoveRequest, Output, SymlinkRequest,
};

/// Upper bound for view/upload/download payloads: 5 MiB.
pub const OPS_SIZE_LIMIT: u64 = 5 * 1024 * 1024;

type Args = serde_json::Map<String, Value>;

/// Builds the "filesystem" router with all operations registered.
pub fn router(sandbox: Arc<Sandbox>) -> Router {
    let mut router = Router::new("filesystem");
    macro_rules! op {
        ($ty:ident) => {
            router.register(Box::new($ty {
                sandbox: sandbox.clone(),
            }))
        };
    }
    op!(Chmod);
    op!(Chown);
    op!(FileType);
    op!(Stat);
    op!(Mkdir);
    op!(Symlink);
    op!(Ls);
    op!(Head);
    op!(Tail);
    op!(View);
    op!(Checksum);
    op!(Rm);
    op!(Compress);
    op!(Extract);
    op!(Mv);
    op!(Cp);
    op!(Download);
    op!(Upload);
    router
}

// ── Shared helpers ───────────────────────────────────────────

fn output_json<T: serde::Serialize>(value: T) -> Result<String> {
    Ok(serde_json::to_string(&Output { output: value })?)
}

/// `rwxr-xr-x`-style permission string with a leading type character.
fn permission_string(mode: u32, type_char: char) -> String {
    let mut s = String::with_capacity(10);
    s.push(type_char);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

/// Assembles the [`File`] metadata model for one path.
///
/// With `dereference` the final symlink is followed; otherwise the link
/// itself is described (so symlinks report as symlinks, with their
/// target).
fn file_entry_with(path: &Path, dereference: bool) -> Result<File> {
    use std::os::unix::fs::MetadataExt;

    let meta = if dereference {
        std::fs::metadata(path)
    } else {
        std::fs::symlink_metadata(path)
    }
    .with_context(|| format!("cannot stat {}", path.display()))?;

    let ft = meta.file_type();
    let (file_type, type_char) = if ft.is_dir() {
        ("directory", 'd')
    } else if ft.is_symlink() {
        ("symlink", 'l')
    } else if ft.is_file() {
        ("file", '-')
    } else {
        ("other", '?')
    };

    let link_target = if ft.is_symlink() {
        std::fs::read_link(path)
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    } else {
        None
    };

    let last_modified = chrono::DateTime::<chrono::Local>::from(meta.modified()?)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();

    Ok(File {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        file_type: file_type.to_string(),
        link_target,
        user: meta.uid().to_string(),
        group: meta.gid().to_string(),
        permissions: permission_string(meta.mode(), type_char),
        last_modified,
        size: meta.len().to_string(),
    })
}

fn file_entry(path: &Path) -> Result<File> {
    file_entry_with(path, false)
}

/// Runs an external command and fails with its stderr on nonzero exit.
async fn run_checked(name: &str, command: &mut Command) -> Result<std::process::Output> {
    let output = command
        .output()
        .await
        .with_context(|| format!("cannot run {name}"))?;
    if !output.status.success() {
        bail!(
            "{name} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

// ── Operations ───────────────────────────────────────────────

/// `chmod` — change permission mode (octal string).
struct Chmod {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Chmod {
    fn name(&self) -> &'static str {
        "chmod"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        use std::os::unix::fs::PermissionsExt;
        let req: ChmodRequest = request_model(&args)?;
        let rp = self.sandbox.resolve(&req.path, true)?;
        let mode = u32::from_str_radix(&req.mode, 8)
            .map_err(|_| anyhow!("invalid octal mode: {}", req.mode))?;
        tokio::fs::set_permissions(&rp, std::fs::Permissions::from_mode(mode)).await?;
        output_json(file_entry(&rp)?)
    }
}

/// `chown` — change ownership (numeric uid/gid).
struct Chown {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Chown {
    fn name(&self) -> &'static str {
        "chown"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: ChownRequest = request_model(&args)?;
        let rp = self.sandbox.resolve(&req.path, true)?;
        std::os::unix::fs::chown(&rp, Some(req.owner), Some(req.group))?;
        output_json(file_entry(&rp)?)
    }
}

/// `file` — describe file content type (`file -b` subprocess).
struct FileType {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for FileType {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        let output = run_checked("file", Command::new("file").arg("-b").arg(&rp)).await?;
        output_json(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `stat` — raw numeric stat fields.
struct Stat {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Stat {
    fn name(&self) -> &'static str {
        "stat"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        use std::os::unix::fs::MetadataExt;
        #[derive(Deserialize)]
        struct Params {
            path: String,
            #[serde(default)]
            dereference: bool,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        let meta = if p.dereference {
            std::fs::metadata(&rp)
        } else {
            std::fs::symlink_metadata(&rp)
        }?;
        output_json(FileStat {
            mode: meta.mode(),
            ino: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
            atime: meta.atime(),
            ctime: meta.ctime(),
            mtime: meta.mtime(),
        })
    }
}

/// `mkdir` — create a directory (`parent` ⇒ `mkdir -p`).
struct Mkdir {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Mkdir {
    fn name(&self) -> &'static str {
        "mkdir"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: MakeDirRequest = request_model(&args)?;
        let rp = self.sandbox.resolve(&req.path, true)?;
        if req.parent {
            tokio::fs::create_dir_all(&rp).await?;
        } else {
            tokio::fs::create_dir(&rp).await?;
        }
        debug!("Created directory {}", rp.display());
        output_json(file_entry(&rp)?)
    }
}

/// `symlink` — create a symlink, both ends inside the sandbox.
struct Symlink {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Symlink {
    fn name(&self) -> &'static str {
        "symlink"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: SymlinkRequest = request_model(&args)?;
        let src_rp = self.sandbox.resolve(&req.path, true)?;
        let dst_rp = self.sandbox.resolve(&req.link_path, true)?;
        tokio::fs::symlink(&src_rp, &dst_rp).await?;
        output_json(file_entry(&dst_rp)?)
    }
}

/// `ls` — directory listing.
struct Ls {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Ls {
    fn name(&self) -> &'static str {
        "ls"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
            #[serde(default)]
            show_hidden: bool,
            // uid/gid are always reported numerically; accepted for
            // wire compatibility
            #[serde(default)]
            #[allow(dead_code)]
            numeric_uid: bool,
            #[serde(default)]
            recursive: bool,
            #[serde(default)]
            dereference: bool,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;

        let mut files = Vec::new();
        if rp.is_dir() {
            list_dir(&rp, p.show_hidden, p.recursive, p.dereference, &mut files)?;
        } else {
            files.push(file_entry_with(&rp, p.dereference)?);
        }
        output_json(files)
    }
}

fn list_dir(
    dir: &Path,
    show_hidden: bool,
    recursive: bool,
    dereference: bool,
    out: &mut Vec<File>,
) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("cannot list {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        out.push(file_entry_with(&path, dereference)?);
        // Recurse into real directories only, never through symlinks
        if recursive && entry.file_type()?.is_dir() {
            list_dir(&path, show_hidden, recursive, dereference, out)?;
        }
    }
    Ok(())
}

/// `head` — first N bytes/lines (or the whole file minus the last N
/// with `skip_trailing`). Exactly one of bytes/lines must be given.
struct Head {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Head {
    fn name(&self) -> &'static str {
        "head"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
            #[serde(default)]
            file_bytes: Option<usize>,
            #[serde(default)]
            lines: Option<usize>,
            #[serde(default)]
            skip_trailing: bool,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        let data = tokio::fs::read(&rp).await?;
        let slice = match (p.file_bytes, p.lines) {
            (Some(n), None) => head_bytes(&data, n, p.skip_trailing),
            (None, Some(n)) => head_lines(&data, n, p.skip_trailing),
            _ => bail!("Exactly one of `bytes` or `lines` must be specified."),
        };
        Ok(String::from_utf8_lossy(&slice).into_owned())
    }
}

/// `tail` — last N bytes/lines (or the whole file minus the first N
/// with `skip_heading`).
struct Tail {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Tail {
    fn name(&self) -> &'static str {
        "tail"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
            #[serde(default)]
            file_bytes: Option<usize>,
            #[serde(default)]
            lines: Option<usize>,
            #[serde(default)]
            skip_heading: bool,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        let data = tokio::fs::read(&rp).await?;
        let slice = match (p.file_bytes, p.lines) {
            (Some(n), None) => tail_bytes(&data, n, p.skip_heading),
            (None, Some(n)) => tail_lines(&data, n, p.skip_heading),
            _ => bail!("Exactly one of `bytes` or `lines` must be specified."),
        };
        Ok(String::from_utf8_lossy(&slice).into_owned())
    }
}

fn head_bytes(data: &[u8], n: usize, skip_trailing: bool) -> Vec<u8> {
    if skip_trailing {
        data[..data.len().saturating_sub(n)].to_vec()
    } else {
        data[..n.min(data.len())].to_vec()
    }
}

fn tail_bytes(data: &[u8], n: usize, skip_heading: bool) -> Vec<u8> {
    if skip_heading {
        data[n.min(data.len())..].to_vec()
    } else {
        data[data.len().saturating_sub(n)..].to_vec()
    }
}

fn head_lines(data: &[u8], n: usize, skip_trailing: bool) -> Vec<u8> {
    let lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();
    let keep = if skip_trailing {
        &lines[..lines.len().saturating_sub(n)]
    } else {
        &lines[..n.min(lines.len())]
    };
    keep.concat()
}

fn tail_lines(data: &[u8], n: usize, skip_heading: bool) -> Vec<u8> {
    let lines: Vec<&[u8]> = data.split_inclusive(|&b| b == b'\n').collect();
    let keep = if skip_heading {
        &lines[n.min(lines.len())..]
    } else {
        &lines[lines.len().saturating_sub(n)..]
    };
    keep.concat()
}

/// `view` — a byte range of a file, capped at [`OPS_SIZE_LIMIT`].
struct View {
    sandbox: Arc<Sandbox>,
}

fn default_view_size() -> u64 {
    OPS_SIZE_LIMIT
}

#[async_trait]
impl Operation for View {
    fn name(&self) -> &'static str {
        "view"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
            #[serde(default = "default_view_size")]
            size: u64,
            #[serde(default)]
            offset: u64,
        }
        let p: Params = args_into(args)?;
        if p.size == 0 {
            bail!("`size` value must be an integer value greater than 0");
        }
        if p.size > OPS_SIZE_LIMIT {
            bail!("`size` value must be less than {OPS_SIZE_LIMIT} bytes");
        }
        let rp = self.sandbox.resolve(&p.path, true)?;
        let mut file = tokio::fs::File::open(&rp).await?;
        file.seek(SeekFrom::Start(p.offset)).await?;
        let mut buf = Vec::new();
        file.take(p.size).read_to_end(&mut buf).await?;
        output_json(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// `checksum` — SHA-256 hex digest.
struct Checksum {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Checksum {
    fn name(&self) -> &'static str {
        "checksum"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        // Hash in chunks so large files never sit in memory whole
        let mut file = tokio::fs::File::open(&rp).await?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        output_json(FileChecksum {
            checksum: hex::encode(hasher.finalize()),
        })
    }
}

/// `rm` — recursive delete. The sandbox root itself is never deletable,
/// whatever the path spelling that reached it.
struct Rm {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Rm {
    fn name(&self) -> &'static str {
        "rm"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        if rp == self.sandbox.root() {
            bail!("Cannot delete sandbox");
        }
        let meta = tokio::fs::symlink_metadata(&rp).await?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&rp).await?;
        } else {
            tokio::fs::remove_file(&rp).await?;
        }
        Ok(format!("Deleted {}", p.path))
    }
}

/// `compress` — create a tar archive (`tar` subprocess).
struct Compress {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Compress {
    fn name(&self) -> &'static str {
        "compress"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: CompressRequest = request_model(&args)?;
        let src_rp = self.sandbox.resolve(&req.path, true)?;
        let dst_rp = self.sandbox.resolve(&req.target_path, true)?;

        // Archive members are stored relative to the sandbox root
        let rel = src_rp.strip_prefix(self.sandbox.root()).unwrap_or(&src_rp);

        let mut cmd = Command::new("tar");
        cmd.arg(req.compression.create_flag()).arg(&dst_rp);
        if req.dereference {
            cmd.arg("--dereference");
        }
        if let Some(ref pattern) = req.match_pattern {
            cmd.arg(format!("--include={pattern}"));
        }
        cmd.arg("-C").arg(self.sandbox.root()).arg(rel);
        run_checked("tar", &mut cmd).await?;
        output_json(file_entry(&dst_rp)?)
    }
}

/// `extract` — unpack a tar archive (`tar` subprocess).
struct Extract {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Extract {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: ExtractRequest = request_model(&args)?;
        let src_rp = self.sandbox.resolve(&req.path, true)?;
        let dst_rp = self.sandbox.resolve(&req.target_path, true)?;

        let flag = req
            .compression
            .map(|c| c.extract_flag())
            // let tar detect the format
            .unwrap_or("-xf");
        let mut cmd = Command::new("tar");
        cmd.arg(flag).arg(&src_rp).arg("-C").arg(&dst_rp);
        run_checked("tar", &mut cmd).await?;
        output_json(file_entry(&dst_rp)?)
    }
}

/// `mv` — rename within the sandbox.
struct Mv {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Mv {
    fn name(&self) -> &'static str {
        "mv"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: MoveRequest = request_model(&args)?;
        let src_rp = self.sandbox.resolve(&req.path, true)?;
        let dst_rp = self.sandbox.resolve(&req.target_path, true)?;
        tokio::fs::rename(&src_rp, &dst_rp).await?;
        output_json(file_entry(&dst_rp)?)
    }
}

/// `cp` — copy a file. Without `dereference` a symlink is copied as a
/// link; with it, the target's content is copied.
struct Cp {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Cp {
    fn name(&self) -> &'static str {
        "cp"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        let req: CopyRequest = request_model(&args)?;
        let src_rp = self.sandbox.resolve(&req.path, true)?;
        let dst_rp = self.sandbox.resolve(&req.target_path, true)?;

        let src_meta = tokio::fs::symlink_metadata(&src_rp).await?;
        if src_meta.is_dir() {
            bail!("cp: {} is a directory", req.path);
        }
        if src_meta.file_type().is_symlink() && !req.dereference {
            let target = tokio::fs::read_link(&src_rp).await?;
            tokio::fs::symlink(&target, &dst_rp).await?;
        } else {
            tokio::fs::copy(&src_rp, &dst_rp).await?;
        }
        output_json(file_entry(&dst_rp)?)
    }
}

/// `download` — base64 file content, size-capped.
struct Download {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Download {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        // Check the size before reading anything into memory
        let meta = tokio::fs::metadata(&rp).await?;
        if meta.len() > OPS_SIZE_LIMIT {
            bail!("File to download is too large.");
        }
        let data = tokio::fs::read(&rp).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&data))
    }
}

/// `upload` — write base64-decoded content, size-capped.
struct Upload {
    sandbox: Arc<Sandbox>,
}

#[async_trait]
impl Operation for Upload {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn execute(&self, _ctx: &OperationContext<'_>, args: Args) -> Result<String> {
        #[derive(Deserialize)]
        struct Params {
            path: String,
            content: String,
        }
        let p: Params = args_into(args)?;
        let rp = self.sandbox.resolve(&p.path, true)?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&p.content)
            .map_err(|e| anyhow!("invalid base64 content: {e}"))?;
        if data.len() as u64 > OPS_SIZE_LIMIT {
            bail!("File to upload is too large.");
        }
        tokio::fs::write(&rp, &data).await?;
        Ok("File uploaded successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Resource, User};
    use serde_json::json;

    fn fixture() -> (tempfile::TempDir, Arc<Sandbox>) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(Sandbox::open(dir.path()).unwrap());
        (dir, sandbox)
    }

    fn args(value: Value) -> Args {
        value.as_object().unwrap().clone()
    }

    async fn run(
        op: &dyn Operation,
        args_value: Value,
    ) -> Result<String> {
        let user = User::new("u1", "User One");
        let resource = Resource::new("storage");
        let ctx = OperationContext {
            resource: &resource,
            user: &user,
        };
        op.execute(&ctx, args(args_value)).await
    }

    #[tokio::test]
    async fn test_mkdir_with_parent_creates_nested_dirs() {
        let (_dir, sb) = fixture();
        let op = Mkdir {
            sandbox: sb.clone(),
        };
        let result = run(
            &op,
            json!({"request_model": {"path": "a/b", "parent": true}}),
        )
        .await
        .unwrap();
        assert!(sb.root().join("a/b").is_dir());
        assert!(result.contains("\"name\":\"b\""));
        assert!(result.contains("\"type\":\"directory\""));
    }

    #[tokio::test]
    async fn test_mkdir_without_parent_needs_existing_parent() {
        let (_dir, sb) = fixture();
        let op = Mkdir {
            sandbox: sb.clone(),
        };
        let err = run(&op, json!({"request_model": {"path": "a/b"}}))
            .await
            .unwrap_err();
        assert!(!sb.root().join("a/b").exists(), "dir created: {err}");
    }

    #[tokio::test]
    async fn test_rm_refuses_sandbox_root() {
        let (_dir, sb) = fixture();
        let op = Rm {
            sandbox: sb.clone(),
        };
        for root_spelling in [".", ""] {
            let err = run(&op, json!({"path": root_spelling})).await.unwrap_err();
            assert_eq!(err.to_string(), "Cannot delete sandbox");
        }
        assert!(sb.root().is_dir());
    }

    #[tokio::test]
    async fn test_rm_escape_mentions_rejected_path() {
        let (_dir, sb) = fixture();
        let op = Rm {
            sandbox: sb.clone(),
        };
        let err = run(&op, json!({"path": "../../etc"})).await.unwrap_err();
        assert_eq!(err.to_string(), "Path outside sandbox: ../../etc");
    }

    #[tokio::test]
    async fn test_rm_deletes_file_and_directory() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("f.txt"), "x").unwrap();
        std::fs::create_dir_all(sb.root().join("d/sub")).unwrap();
        let op = Rm {
            sandbox: sb.clone(),
        };
        run(&op, json!({"path": "f.txt"})).await.unwrap();
        run(&op, json!({"path": "d"})).await.unwrap();
        assert!(!sb.root().join("f.txt").exists());
        assert!(!sb.root().join("d").exists());
    }

    #[tokio::test]
    async fn test_head_and_tail_by_lines() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("log.txt"), "one\ntwo\nthree\n").unwrap();
        let head = Head {
            sandbox: sb.clone(),
        };
        let tail = Tail {
            sandbox: sb.clone(),
        };
        assert_eq!(
            run(&head, json!({"path": "log.txt", "lines": 2})).await.unwrap(),
            "one\ntwo\n"
        );
        assert_eq!(
            run(&tail, json!({"path": "log.txt", "lines": 1})).await.unwrap(),
            "three\n"
        );
        // skip variants: whole file minus N lines
        assert_eq!(
            run(&head, json!({"path": "log.txt", "lines": 1, "skip_trailing": true}))
                .await
                .unwrap(),
            "one\ntwo\n"
        );
        assert_eq!(
            run(&tail, json!({"path": "log.txt", "lines": 1, "skip_heading": true}))
                .await
                .unwrap(),
            "two\nthree\n"
        );
    }

    #[tokio::test]
    async fn test_head_and_tail_by_bytes() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("data.txt"), "abcdefgh").unwrap();
        let head = Head {
            sandbox: sb.clone(),
        };
        let tail = Tail {
            sandbox: sb.clone(),
        };
        assert_eq!(
            run(&head, json!({"path": "data.txt", "file_bytes": 3})).await.unwrap(),
            "abc"
        );
        assert_eq!(
            run(&tail, json!({"path": "data.txt", "file_bytes": 3})).await.unwrap(),
            "fgh"
        );
    }

    #[tokio::test]
    async fn test_head_requires_exactly_one_of_bytes_or_lines() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("x.txt"), "x").unwrap();
        let head = Head {
            sandbox: sb.clone(),
        };
        for bad in [
            json!({"path": "x.txt"}),
            json!({"path": "x.txt", "file_bytes": 1, "lines": 1}),
        ] {
            let err = run(&head, bad).await.unwrap_err();
            assert!(err.to_string().contains("Exactly one"));
        }
    }

    #[tokio::test]
    async fn test_view_slices_by_offset_and_size() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("v.txt"), "0123456789").unwrap();
        let op = View {
            sandbox: sb.clone(),
        };
        let result = run(&op, json!({"path": "v.txt", "offset": 2, "size": 4}))
            .await
            .unwrap();
        assert_eq!(result, "{\"output\":\"2345\"}");
        // reads past EOF just truncate
        let result = run(&op, json!({"path": "v.txt", "offset": 8, "size": 100}))
            .await
            .unwrap();
        assert_eq!(result, "{\"output\":\"89\"}");
    }

    #[tokio::test]
    async fn test_view_rejects_zero_and_oversized_size() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("v.txt"), "x").unwrap();
        let op = View {
            sandbox: sb.clone(),
        };
        assert!(run(&op, json!({"path": "v.txt", "size": 0})).await.is_err());
        assert!(
            run(&op, json!({"path": "v.txt", "size": OPS_SIZE_LIMIT + 1}))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_checksum_is_sha256() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("hello.txt"), "hello world").unwrap();
        let op = Checksum {
            sandbox: sb.clone(),
        };
        let result = run(&op, json!({"path": "hello.txt"})).await.unwrap();
        assert_eq!(
            result,
            "{\"output\":{\"checksum\":\"b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9\"}}"
        );
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let (_dir, sb) = fixture();
        let upload = Upload {
            sandbox: sb.clone(),
        };
        let download = Download {
            sandbox: sb.clone(),
        };
        let content = base64::engine::general_purpose::STANDARD.encode(b"payload bytes");
        let msg = run(&upload, json!({"path": "up.bin", "content": content}))
            .await
            .unwrap();
        assert_eq!(msg, "File uploaded successfully");
        assert_eq!(std::fs::read(sb.root().join("up.bin")).unwrap(), b"payload bytes");

        let encoded = run(&download, json!({"path": "up.bin"})).await.unwrap();
        assert_eq!(encoded, content);
    }

    #[tokio::test]
    async fn test_checksum_streams_multi_chunk_files() {
        let (_dir, sb) = fixture();
        // Larger than one read buffer, so hashing spans several chunks
        let data = vec![b'a'; 20_000];
        std::fs::write(sb.root().join("big.bin"), &data).unwrap();
        let op = Checksum {
            sandbox: sb.clone(),
        };
        let result = run(&op, json!({"path": "big.bin"})).await.unwrap();
        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(result, format!("{{\"output\":{{\"checksum\":\"{expected}\"}}}}"));
    }

    #[tokio::test]
    async fn test_download_refuses_oversized_file_without_reading_it() {
        let (_dir, sb) = fixture();
        // Sparse file: the size check must fire on metadata alone
        let f = std::fs::File::create(sb.root().join("huge.bin")).unwrap();
        f.set_len(OPS_SIZE_LIMIT + 1).unwrap();
        let op = Download {
            sandbox: sb.clone(),
        };
        let err = run(&op, json!({"path": "huge.bin"})).await.unwrap_err();
        assert_eq!(err.to_string(), "File to download is too large.");
    }

    #[tokio::test]
    async fn test_upload_rejects_invalid_base64() {
        let (_dir, sb) = fixture();
        let op = Upload {
            sandbox: sb.clone(),
        };
        let err = run(&op, json!({"path": "up.bin", "content": "not base64!!!"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[tokio::test]
    async fn test_mv_renames() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("old.txt"), "data").unwrap();
        let op = Mv {
            sandbox: sb.clone(),
        };
        run(
            &op,
            json!({"request_model": {"path": "old.txt", "target_path": "new.txt"}}),
        )
        .await
        .unwrap();
        assert!(!sb.root().join("old.txt").exists());
        assert_eq!(std::fs::read_to_string(sb.root().join("new.txt")).unwrap(), "data");
    }

    #[tokio::test]
    async fn test_cp_copies_file_and_refuses_dir() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("src.txt"), "data").unwrap();
        std::fs::create_dir(sb.root().join("d")).unwrap();
        let op = Cp {
            sandbox: sb.clone(),
        };
        run(
            &op,
            json!({"request_model": {"path": "src.txt", "target_path": "dst.txt"}}),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(sb.root().join("dst.txt")).unwrap(), "data");

        let err = run(
            &op,
            json!({"request_model": {"path": "d", "target_path": "d2"}}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_then_stat_without_dereference() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("target.txt"), "data").unwrap();
        let symlink = Symlink {
            sandbox: sb.clone(),
        };
        let result = run(
            &symlink,
            json!({"request_model": {"path": "target.txt", "link_path": "link.txt"}}),
        )
        .await
        .unwrap();
        assert!(result.contains("\"type\":\"symlink\""));

        let stat = Stat {
            sandbox: sb.clone(),
        };
        // Without dereference the link itself is described; resolve()
        // follows it, so ask through the target to pin the inode
        let direct = run(&stat, json!({"path": "target.txt"})).await.unwrap();
        let through = run(&stat, json!({"path": "link.txt", "dereference": true}))
            .await
            .unwrap();
        assert_eq!(direct, through);
    }

    #[tokio::test]
    async fn test_ls_hides_dotfiles_by_default() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("visible.txt"), "x").unwrap();
        std::fs::write(sb.root().join(".hidden"), "x").unwrap();
        let op = Ls {
            sandbox: sb.clone(),
        };
        let result = run(&op, json!({"path": "."})).await.unwrap();
        assert!(result.contains("visible.txt"));
        assert!(!result.contains(".hidden"));

        let result = run(&op, json!({"path": ".", "show_hidden": true}))
            .await
            .unwrap();
        assert!(result.contains(".hidden"));
    }

    #[tokio::test]
    async fn test_ls_recursive_descends() {
        let (_dir, sb) = fixture();
        std::fs::create_dir_all(sb.root().join("sub")).unwrap();
        std::fs::write(sb.root().join("sub/deep.txt"), "x").unwrap();
        let op = Ls {
            sandbox: sb.clone(),
        };
        let flat = run(&op, json!({"path": "."})).await.unwrap();
        assert!(!flat.contains("deep.txt"));
        let deep = run(&op, json!({"path": ".", "recursive": true})).await.unwrap();
        assert!(deep.contains("deep.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_chmod_sets_mode() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("f.txt"), "x").unwrap();
        let op = Chmod {
            sandbox: sb.clone(),
        };
        let result = run(
            &op,
            json!({"request_model": {"path": "f.txt", "mode": "750"}}),
        )
        .await
        .unwrap();
        let mode = std::fs::metadata(sb.root().join("f.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
        assert!(result.contains("rwxr-x---"));
    }

    #[tokio::test]
    async fn test_chmod_invalid_mode_string() {
        let (_dir, sb) = fixture();
        std::fs::write(sb.root().join("f.txt"), "x").unwrap();
        let op = Chmod {
            sandbox: sb.clone(),
        };
        let err = run(
            &op,
            json!({"request_model": {"path": "f.txt", "mode": "rwx"}}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid octal mode"));
    }

    #[tokio::test]
    async fn test_compress_extract_round_trip() {
        let (_dir, sb) = fixture();
        std::fs::create_dir(sb.root().join("payload")).unwrap();
        std::fs::write(sb.root().join("payload/a.txt"), "alpha").unwrap();
        std::fs::create_dir(sb.root().join("out")).unwrap();

        let compress = Compress {
            sandbox: sb.clone(),
        };
        run(
            &compress,
            json!({"request_model": {
                "path": "payload",
                "target_path": "archive.tar.gz",
                "compression": "gzip"
            }}),
        )
        .await
        .unwrap();
        assert!(sb.root().join("archive.tar.gz").is_file());

        let extract = Extract {
            sandbox: sb.clone(),
        };
        run(
            &extract,
            json!({"request_model": {
                "path": "archive.tar.gz",
                "target_path": "out",
                "compression": "gzip"
            }}),
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(sb.root().join("out/payload/a.txt")).unwrap(),
            "alpha"
        );
    }

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o755, '-'), "-rwxr-xr-x");
        assert_eq!(permission_string(0o640, '-'), "-rw-r-----");
        assert_eq!(permission_string(0o777, 'd'), "drwxrwxrwx");
        assert_eq!(permission_string(0o000, 'l'), "l---------");
    }

    #[test]
    fn test_head_tail_byte_helpers_on_short_input() {
        let data = b"abc";
        assert_eq!(head_bytes(data, 10, false), b"abc");
        assert_eq!(head_bytes(data, 10, true), b"");
        assert_eq!(tail_bytes(data, 10, false), b"abc");
        assert_eq!(tail_bytes(data, 10, true), b"");
    }
}
