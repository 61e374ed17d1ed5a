//! Agent link handler

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

use nexus_protocol::{decode_frame, encode_frame, AgentFrame, Hello};

use crate::state::HubState;

use super::{next_text, HANDSHAKE_TIMEOUT, MAX_PROTOCOL_VIOLATIONS, OUTBOUND_QUEUE_LIMIT};

/// Websocket upgrade handler for agent links.
///
/// GET /ws/agent
pub async fn upgrade(State(state): State<Arc<HubState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut sender, mut receiver) = socket.split();

    // Handshake step one: the agent hello with the shared credential.
    let hello = match timeout(HANDSHAKE_TIMEOUT, next_text(&mut receiver)).await {
        Ok(Some(text)) => decode_frame::<Hello>(&text),
        _ => {
            tracing::debug!("Agent link closed before handshake");
            let _ = sender.close().await;
            return;
        }
    };
    let credential = match hello {
        Ok(Hello::Agent { credential }) => credential,
        _ => {
            let _ = sender.close().await;
            return;
        }
    };
    if !state.agent_credential_ok(&credential) {
        tracing::warn!("Agent link rejected: bad credential");
        state
            .audit
            .record(
                "agent_rejected",
                serde_json::json!({ "reason": "credential" }),
                None,
                None,
            )
            .await;
        let _ = sender.close().await;
        return;
    }

    // Handshake step two: the register frame naming the agent.
    let register = match timeout(HANDSHAKE_TIMEOUT, next_text(&mut receiver)).await {
        Ok(Some(text)) => decode_frame::<AgentFrame>(&text),
        _ => {
            let _ = sender.close().await;
            return;
        }
    };
    let name = match register {
        Ok(AgentFrame::Register { name }) if !name.trim().is_empty() => name,
        _ => {
            tracing::debug!("Agent link closed: no register frame");
            let _ = sender.close().await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_LIMIT);
    let cancel = state.shutdown.child_token();
    let (entry, displaced) = state.agents.register(&name, tx, cancel.clone());
    if let Some(displaced) = displaced {
        // Newest connection wins; the old link is closed and anything
        // still queued to it is dropped.
        tracing::info!("Agent {} reconnected, displacing previous link", entry.key);
        displaced.cancel.cancel();
    } else {
        tracing::info!("Agent {} connected", entry.key);
    }
    state.broadcast_agent_list();

    // Writer: drain the outbound queue onto the socket.
    let writer_cancel = cancel.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(frame) = maybe else { break };
                    let Ok(text) = encode_frame(&frame) else { continue };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = writer_cancel.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader: dispatch inbound frames until the link dies.
    let mut violations = 0u32;
    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match decode_frame::<AgentFrame>(&text) {
                            Ok(frame) => state.handle_agent_frame(&entry, frame).await,
                            Err(e) => {
                                violations += 1;
                                tracing::warn!(
                                    "Dropping bad frame from agent {}: {}",
                                    entry.key,
                                    e
                                );
                                if violations >= MAX_PROTOCOL_VIOLATIONS {
                                    tracing::warn!(
                                        "Agent {} exceeded protocol violation limit",
                                        entry.key
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Agent {} socket error: {}", entry.key, e);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    cancel.cancel();
    let _ = send_task.await;
    state.agent_disconnected(&entry);
}
