//! Policy error types.

use thiserror::Error;

/// Validation errors.
///
/// An event rejected with one of these never reaches the queue.
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The event name is empty or blank.
    #[error("event name must not be empty")]
    EmptyName,

    /// A parameter key is empty or blank.
    #[error("parameter key must not be empty")]
    EmptyKey,

    /// The caller tried to set a key owned by the session.
    #[error("parameter '{0}' is reserved and cannot be set by callers")]
    ReservedParameter(String),

    /// More parameters than the policy allows.
    #[error("too many parameters: {count} (max {max})")]
    TooManyParams { count: usize, max: usize },

    /// Failed to parse a policy file.
    #[error("failed to parse policy: {0}")]
    Parse(String),

    /// An I/O error occurred while reading policy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
