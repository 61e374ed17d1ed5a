//! Duplex link endpoints
//!
//! Two websocket upgrade routes: one for browser clients, one for agents.
//! Each connection runs one reader loop (inbound dispatch) and one writer
//! task draining the bounded outbound queue. A peer that cannot keep up
//! overflows the queue and is disconnected; both peer kinds reconnect.

pub mod agent;
pub mod client;

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::StreamExt;

/// Time allowed to complete the handshake after the socket opens
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded outbound queue depth per connection
pub const OUTBOUND_QUEUE_LIMIT: usize = 1024;

/// Protocol violations tolerated before the link is closed
pub const MAX_PROTOCOL_VIOLATIONS: u32 = 8;

/// Read the next text payload, skipping pings and pongs.
///
/// Returns None once the stream closes or errors.
pub(crate) async fn next_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}
