//! nexus-protocol: Wire protocol for the Nexus terminal relay
//!
//! This crate defines the JSON frame schema spoken on the duplex links
//! between the hub and its peers. Frames are tagged objects (`type` field)
//! and are split into role-scoped enums so that a frame arriving from the
//! wrong kind of peer fails to parse instead of being silently misrouted.

pub mod error;
pub mod frames;
pub mod size;

pub use error::ProtocolError;
pub use frames::{
    AgentFrame, AgentInfo, AgentStatus, ClientFrame, Hello, HubToAgent, HubToClient, SessionInfo,
};
pub use size::TerminalSize;

/// Maximum accepted length of a single `execute` payload, in bytes.
pub const MAX_COMMAND_BYTES: usize = 4096;

/// Decode a single inbound frame of type `T` from websocket text.
///
/// Returns `ProtocolError::UnknownFrame` when the JSON is well-formed but
/// does not match any frame of the expected role, and
/// `ProtocolError::MalformedJson` when it is not JSON at all.
pub fn decode_frame<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(ProtocolError::MalformedJson)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("<missing>")
        .to_string();
    serde_json::from_value(value).map_err(|_| ProtocolError::UnknownFrame(kind))
}

/// Encode an outbound frame as websocket text.
pub fn encode_frame<T: serde::Serialize>(frame: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(ProtocolError::MalformedJson)
}
