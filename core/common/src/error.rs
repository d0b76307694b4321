//! Common error types for Usher.

use thiserror::Error;

/// Message fragments the backend uses when rejecting a mutation that was
/// already applied. Matched case-insensitively against remote rejections.
const DUPLICATE_PATTERNS: &[&str] = &[
    "already registered",
    "already subscribed",
    "already recorded",
];

/// Top-level error type for Usher operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No response was obtained from the remote (timeout, connection refused,
    /// DNS failure). The request may or may not have been received.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote responded and rejected the request.
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The device is offline and no usable cached copy exists.
    #[error("Offline with no cached copy: {0}")]
    OfflineNoCache(String),

    /// A queued operation hit the retry cap and was evicted.
    #[error("Retry limit reached for {kind} after {attempts} attempts")]
    RetryExhausted { kind: String, attempts: u32 },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A background component is not running.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// True when the request never reached the remote. Transport failures are
    /// the only class that makes a mutation eligible for queueing.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// True when a remote rejection means the operation already took effect,
    /// so a replay can be treated as success.
    ///
    /// Detection is by message pattern because the backend emits no
    /// structured duplicate code. Only client errors (4xx) qualify; a 5xx
    /// with a matching message says nothing about whether the write landed.
    pub fn already_applied(&self) -> bool {
        match self {
            Error::Remote { status, message } if (400..500).contains(status) => {
                let message = message.to_lowercase();
                DUPLICATE_PATTERNS.iter().any(|p| message.contains(p))
            }
            _ => false,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
