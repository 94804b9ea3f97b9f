//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire events
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Message exceeds maximum size
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Binary frame that is not valid UTF-8 JSON
    #[error("Binary frame is not UTF-8")]
    NotUtf8,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
