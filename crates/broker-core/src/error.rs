use thiserror::Error;

/// The closed set of error kinds every handler boundary converts into
/// (spec.md §7). Replaces the source's broad, stringly-typed catching
/// with a small surface callers can branch on.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("owner mismatch")]
    Authorization,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("remote server unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "validation",
            BrokerError::Authorization => "authorization",
            BrokerError::NotFound(_) => "not_found",
            BrokerError::Submission(_) => "submission",
            BrokerError::RemoteUnreachable(_) => "remote_unreachable",
            BrokerError::Timeout(_) => "timeout",
            BrokerError::Internal(_) => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            BrokerError::Validation(_) => 400,
            BrokerError::Authorization => 403,
            BrokerError::NotFound(_) => 404,
            _ => 500,
        }
    }
}
