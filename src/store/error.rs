use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid timestamp {0} in store")]
    InvalidTimestamp(i64),

    #[error("unknown transfer status '{0}'")]
    InvalidStatus(String),

    #[error("store connection poisoned by a panicked writer")]
    Poisoned,
}
