//! Media Engine error type.

use crate::types::MediaKind;
use thiserror::Error;

/// Errors reported by a Media Engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Parameters supplied by the client were rejected by the engine.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The object has already been closed.
    #[error("{0} is closed")]
    Closed(String),

    /// The referenced engine object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The router cannot forward the producer to the given capabilities.
    #[error("Cannot consume producer {producer_id}")]
    CannotConsume { producer_id: String },

    /// The router was created without a codec for this kind.
    #[error("Unsupported media kind: {0}")]
    UnsupportedKind(MediaKind),

    /// The engine (or the worker behind it) cannot serve requests.
    #[error("Media engine unavailable: {0}")]
    Unavailable(String),
}
