//! Client link handler

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use nexus_core::types::ClientId;
use nexus_protocol::{decode_frame, encode_frame, ClientFrame, Hello, HubToClient};

use crate::registry::ClientHandle;
use crate::state::HubState;

use super::{next_text, HANDSHAKE_TIMEOUT, MAX_PROTOCOL_VIOLATIONS, OUTBOUND_QUEUE_LIMIT};

/// Websocket upgrade handler for client links.
///
/// GET /ws/client
pub async fn upgrade(State(state): State<Arc<HubState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut sender, mut receiver) = socket.split();

    // Handshake: a client hello carrying a valid bearer, within the window.
    let hello = match timeout(HANDSHAKE_TIMEOUT, next_text(&mut receiver)).await {
        Ok(Some(text)) => decode_frame::<Hello>(&text),
        _ => {
            tracing::debug!("Client link closed before handshake");
            let _ = sender.close().await;
            return;
        }
    };
    let token = match hello {
        Ok(Hello::Client { token }) => token,
        _ => {
            let _ = send_direct(&mut sender, "expected client handshake").await;
            let _ = sender.close().await;
            return;
        }
    };
    let claims = match state.credentials.verify_bearer(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Client link rejected: {}", e);
            let _ = send_direct(&mut sender, &e.to_string()).await;
            let _ = sender.close().await;
            return;
        }
    };

    let client_id = ClientId::new(Uuid::new_v4().to_string());
    let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_LIMIT);
    let cancel = state.shutdown.child_token();
    let handle = Arc::new(ClientHandle {
        id: client_id.clone(),
        principal: claims.sub,
        tx,
        cancel: cancel.clone(),
    });
    state.clients.insert(Arc::clone(&handle));
    tracing::info!("Client {} connected as {}", client_id, handle.principal);

    // The current agent catalogue goes out immediately on accept.
    handle.push(HubToClient::AgentList {
        agents: state.agents.snapshot(),
    });

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
                        match decode_frame::<ClientFrame>(&text) {
                            Ok(frame) => state.handle_client_frame(&handle, frame).await,
                            Err(e) => {
                                violations += 1;
                                tracing::warn!(
                                    "Dropping bad frame from client {}: {}",
                                    client_id,
                                    e
                                );
                                if violations >= MAX_PROTOCOL_VIOLATIONS {
                                    tracing::warn!(
                                        "Client {} exceeded protocol violation limit",
                                        client_id
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("Client {} socket error: {}", client_id, e);
                        break;
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    cancel.cancel();
    let _ = send_task.await;
    state.client_disconnected(&client_id).await;
    tracing::info!("Client {} disconnected", client_id);
}

async fn send_direct(
    sender: &mut (impl SinkExt<Message> + Unpin),
    message: &str,
) -> Result<(), ()> {
    let frame = HubToClient::Error {
        message: message.to_string(),
    };
    let text = encode_frame(&frame).map_err(|_| ())?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}
