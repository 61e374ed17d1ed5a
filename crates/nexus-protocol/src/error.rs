//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding or validating frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload was not valid JSON
    #[error("Malformed JSON frame: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// JSON was well-formed but matched no frame of the expected role
    #[error("Unknown frame type: {0}")]
    UnknownFrame(String),

    /// A frame arrived from a peer whose role may not send it
    #[error("Frame {frame} not permitted for role {role}")]
    WrongRole { frame: String, role: &'static str },

    /// Payload exceeds the protocol limit
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },
}
