use thiserror::Error;

/// Persistence errors.
///
/// Any of these on `enqueue` means the event was not stored.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("row decode error: {0}")]
    Row(#[from] serde_rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt queue row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;
