use storage::Event;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid event: {0}")]
    Validation(#[from] policy::Error),

    /// The event could not be stored. It is handed back so the caller can
    /// keep it and offer it again with [`Tracker::enqueue`](crate::Tracker::enqueue).
    #[error("failed to persist event {}: {source}", event.id)]
    Persistence {
        event: Box<Event>,
        #[source]
        source: storage::Error,
    },

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("tracker has been shut down")]
    Stopped,

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
