use crate::error::SlurmError;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

pub struct Output {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `bin` with `args`, enforcing `timeout_secs`. Does not check the
/// exit status: callers decide what counts as success per-binary.
pub async fn run(bin: &'static str, args: &[&str], timeout_secs: u64) -> Result<Output, SlurmError> {
    let mut cmd = Command::new(bin);
    cmd.args(args);
    tracing::debug!(bin, ?args, "spawning slurm cli");

    let child = cmd.output();
    let out = timeout(Duration::from_secs(timeout_secs), child)
        .await
        .map_err(|_| SlurmError::Timeout {
            bin,
            secs: timeout_secs,
        })?
        .map_err(|e| SlurmError::Spawn(e, bin))?;

    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    if !out.status.success() {
        tracing::warn!(bin, status = ?out.status.code(), %stderr, "slurm cli exited non-zero");
    }
    Ok(Output {
        status: out.status.code(),
        stdout,
        stderr,
    })
}
