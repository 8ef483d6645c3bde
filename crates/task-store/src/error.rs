use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no such task: {0}")]
    NotFound(String),
}

impl From<StoreError> for broker_core::BrokerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => broker_core::BrokerError::NotFound(id),
            other => broker_core::BrokerError::Internal(other.to_string()),
        }
    }
}
