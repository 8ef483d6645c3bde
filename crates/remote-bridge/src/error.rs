use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rsync exited {status:?}: {stderr}")]
    RsyncFailed { status: Option<i32>, stderr: String },
    #[error("rsync timed out after {0}s")]
    RsyncTimeout(u64),
    #[error("remote server unreachable: {0}")]
    RemoteUnreachable(String),
    #[error("remote server returned an error: {0}")]
    RemoteError(String),
}

impl From<BridgeError> for broker_core::BrokerError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::RemoteUnreachable(m) => broker_core::BrokerError::RemoteUnreachable(m),
            BridgeError::RsyncFailed { stderr, .. } => broker_core::BrokerError::Submission(stderr),
            BridgeError::RsyncTimeout(secs) => {
                broker_core::BrokerError::Timeout(format!("rsync timed out after {secs}s"))
            }
            other => broker_core::BrokerError::Internal(other.to_string()),
        }
    }
}
