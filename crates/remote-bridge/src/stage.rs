use crate::error::BridgeError;
use broker_core::is_ignored;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::time::timeout;

const RSYNC_TIMEOUT_SECS: u64 = 3600;

/// Materialize a staging tree under `staging_dir` by copying
/// `upload_root`, filtering out any path under `ignore` (spec.md §4.3
/// step 1). The staging directory is wiped and rebuilt on every call:
/// idempotence comes from rsync, not from a diff here.
pub async fn copy_to_temp(
    upload_root: &Path,
    ignore: &[String],
    staging_dir: &Path,
) -> Result<(), BridgeError> {
    let upload_root = upload_root.to_path_buf();
    let staging_dir = staging_dir.to_path_buf();
    let ignore_set: BTreeSet<PathBuf> = ignore.iter().map(PathBuf::from).collect();

    tokio::task::spawn_blocking(move || copy_to_temp_sync(&upload_root, &ignore_set, &staging_dir))
        .await
        .map_err(|e| BridgeError::Io(std::io::Error::other(e)))??;
    Ok(())
}

fn copy_to_temp_sync(
    upload_root: &Path,
    ignore: &BTreeSet<PathBuf>,
    staging_dir: &Path,
) -> Result<(), BridgeError> {
    if staging_dir.exists() {
        std::fs::remove_dir_all(staging_dir)?;
    }
    std::fs::create_dir_all(staging_dir)?;

    for entry in walkdir::WalkDir::new(upload_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let rel = match entry.path().strip_prefix(upload_root) {
            Ok(r) if !r.as_os_str().is_empty() => r,
            _ => continue,
        };
        if is_ignored(ignore, rel) {
            continue;
        }
        let dest = staging_dir.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

pub struct SshTarget<'a> {
    pub key_path: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub host: &'a str,
}

/// Push the staging tree to the remote host. Per the re-architecture
/// note in spec.md §9, this spawns `rsync` with an explicit argument
/// vector; the `-e` value is a single structured argument, never a
/// shell string the path components are concatenated into.
pub async fn rsync_push(
    staging_dir: &Path,
    remote_dir: &str,
    target: &SshTarget<'_>,
) -> Result<(), BridgeError> {
    run_rsync(
        &format!("{}/", staging_dir.display()),
        &format!("{}@{}:{}/", target.user, target.host, remote_dir),
        target,
    )
    .await
}

async fn run_rsync(src: &str, dest: &str, target: &SshTarget<'_>) -> Result<(), BridgeError> {
    let ssh_opt = format!(
        "ssh -i {} -p {} -o StrictHostKeyChecking=no",
        target.key_path, target.port
    );
    let mut cmd = Command::new("rsync");
    cmd.arg("-avz").arg("-e").arg(&ssh_opt).arg(src).arg(dest);
    tracing::debug!(src, dest, "spawning rsync");

    let out = timeout(
        std::time::Duration::from_secs(RSYNC_TIMEOUT_SECS),
        cmd.output(),
    )
    .await
    .map_err(|_| BridgeError::RsyncTimeout(RSYNC_TIMEOUT_SECS))??;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        tracing::warn!(status = ?out.status.code(), %stderr, "rsync failed");
        return Err(BridgeError::RsyncFailed {
            status: out.status.code(),
            stderr,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_to_temp_filters_ignored_paths() {
        let base = std::env::temp_dir().join(format!("rb-test-{}", std::process::id()));
        let upload = base.join("upload");
        let staging = base.join("staging");
        std::fs::create_dir_all(upload.join("a/b")).unwrap();
        std::fs::write(upload.join("keep.txt"), "k").unwrap();
        std::fs::write(upload.join("a/b/secret.txt"), "s").unwrap();

        copy_to_temp(&upload, &["a/b".to_string()], &staging)
            .await
            .unwrap();

        assert!(staging.join("keep.txt").exists());
        assert!(!staging.join("a/b/secret.txt").exists());
        std::fs::remove_dir_all(&base).ok();
    }
}
