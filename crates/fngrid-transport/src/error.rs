//! Error types for the transport boundary.

use thiserror::Error;

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by transport collaborators.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("{0} metrics stream is closed")]
    StreamClosed(&'static str),
}
