use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlurmError {
    #[error("{bin} exited with status {status:?}: {stderr}")]
    NonZeroExit {
        bin: &'static str,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{bin} timed out after {secs}s")]
    Timeout { bin: &'static str, secs: u64 },
    #[error("could not parse {bin} output: {detail}")]
    UnparsableOutput { bin: &'static str, detail: String },
    #[error("failed to spawn {1}: {0}")]
    Spawn(std::io::Error, &'static str),
}
