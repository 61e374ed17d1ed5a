//! Frame routing
//!
//! The hub's dispatch matrix: every inbound frame is handled here, after
//! the link layer has pinned the sender's role. Faults stay local to the
//! originating connection or session; delivery failures surface to the
//! originating client as `error` frames, never as closed links.

use std::collections::HashSet;
use std::sync::Arc;

use nexus_core::error::{ResourceError, RoutingError};
use nexus_core::types::{AgentKey, ClientId, SessionId};
use nexus_protocol::{
    AgentFrame, ClientFrame, HubToAgent, HubToClient, ProtocolError, TerminalSize,
    MAX_COMMAND_BYTES,
};

use crate::registry::{AgentEntry, ClientHandle};
use crate::state::HubState;

impl HubState {
    /// Handle one frame from an authenticated client
    pub async fn handle_client_frame(&self, client: &Arc<ClientHandle>, frame: ClientFrame) {
        match frame {
            ClientFrame::Register => {
                client.push(HubToClient::AgentList {
                    agents: self.agents.snapshot(),
                });
                client.push(HubToClient::SessionList {
                    sessions: self.sessions.list(),
                });
            }

            ClientFrame::CreateSession {
                id,
                worker_name,
                worker_key,
                display_name,
            } => {
                if id.trim().is_empty() {
                    self.send_error(client, "session id must not be empty");
                    return;
                }
                let session_id = SessionId::new(id);
                match self
                    .sessions
                    .create(
                        session_id.clone(),
                        worker_name,
                        AgentKey::new(&worker_key),
                        display_name,
                    )
                    .await
                {
                    Ok(entry) => {
                        self.audit
                            .record(
                                "session_create",
                                serde_json::json!({ "sessionId": session_id.as_str() }),
                                Some(&client.principal),
                                Some(entry.worker_key.as_str()),
                            )
                            .await;
                        self.broadcast_session_list();
                    }
                    Err(e) => self.send_error(client, e),
                }
            }

            ClientFrame::CloseSession { session_id } => {
                let session_id = SessionId::new(session_id);
                let entry = match self.sessions.get(&session_id) {
                    Some(entry) => entry,
                    None => {
                        self.send_error(
                            client,
                            RoutingError::UnknownSession(session_id.to_string()),
                        );
                        return;
                    }
                };
                match self.sessions.close(&session_id).await {
                    Ok(()) => {
                        self.rooms.remove_session(&session_id);
                        self.reconciler.forget(&session_id);

                        // The owning agent must kill the PTY and honour the
                        // kill flag; every client sees the removal.
                        if let Some(agent) = self.agents.get_online(&entry.worker_key) {
                            agent.push(HubToAgent::KillSession {
                                session_id: session_id.to_string(),
                            });
                        }
                        self.clients.broadcast(HubToClient::SessionClosed {
                            session_id: session_id.to_string(),
                        });
                        self.broadcast_session_list();

                        self.audit
                            .record(
                                "session_close",
                                serde_json::json!({ "sessionId": session_id.as_str() }),
                                Some(&client.principal),
                                Some(entry.worker_key.as_str()),
                            )
                            .await;
                    }
                    Err(e) => self.send_error(client, e),
                }
            }

            ClientFrame::RenameSession {
                session_id,
                display_name,
            } => {
                let session_id = SessionId::new(session_id);
                match self.sessions.rename(&session_id, display_name).await {
                    Ok(()) => self.broadcast_session_list(),
                    Err(e) => self.send_error(client, e),
                }
            }

            ClientFrame::JoinSession {
                session_id,
                cols,
                rows,
            } => {
                let session_id = SessionId::new(session_id);
                let entry = match self.sessions.get(&session_id) {
                    Some(entry) => entry,
                    None => {
                        self.send_error(
                            client,
                            RoutingError::UnknownSession(session_id.to_string()),
                        );
                        return;
                    }
                };

                self.rooms
                    .join(&session_id, &client.id, TerminalSize::new(cols, rows));
                self.reconcile_session(&session_id, &client.id);

                // Hydrate the late joiner from the stored tail.
                client.push(HubToClient::SessionOutput {
                    session_id: session_id.to_string(),
                    data: entry.tail(),
                });
            }

            ClientFrame::LeaveSession { session_id } => {
                let session_id = SessionId::new(session_id);
                if self.rooms.leave(&session_id, &client.id) {
                    self.reconcile_session(&session_id, &client.id);
                }
            }

            ClientFrame::GetSessionList => {
                client.push(HubToClient::SessionList {
                    sessions: self.sessions.list(),
                });
            }

            ClientFrame::GetSessionOutput { session_id } => {
                let session_id = SessionId::new(session_id);
                match self.sessions.get(&session_id) {
                    Some(entry) => {
                        client.push(HubToClient::SessionOutput {
                            session_id: session_id.to_string(),
                            data: entry.tail(),
                        });
                    }
                    None => self.send_error(
                        client,
                        RoutingError::UnknownSession(session_id.to_string()),
                    ),
                }
            }

            ClientFrame::Execute {
                session_id,
                command,
                ..
            } => {
                self.route_execute(client, SessionId::new(session_id), command)
                    .await;
            }

            ClientFrame::Resize {
                session_id,
                cols,
                rows,
                ..
            } => {
                let session_id = SessionId::new(session_id);
                // A viewport only counts once declared via join_session.
                if self.rooms.update_viewport(
                    &session_id,
                    &client.id,
                    TerminalSize::new(cols, rows),
                ) {
                    self.reconcile_session(&session_id, &client.id);
                }
            }
        }
    }

    async fn route_execute(
        &self,
        client: &Arc<ClientHandle>,
        session_id: SessionId,
        command: String,
    ) {
        if command.len() > MAX_COMMAND_BYTES {
            self.send_error(
                client,
                ProtocolError::PayloadTooLarge {
                    size: command.len(),
                    max: MAX_COMMAND_BYTES,
                },
            );
            return;
        }

        let entry = match self.sessions.get(&session_id) {
            Some(entry) => entry,
            None => {
                self.send_error(
                    client,
                    RoutingError::UnknownSession(session_id.to_string()),
                );
                return;
            }
        };

        let agent = match self.agents.get_online(&entry.worker_key) {
            Some(agent) => agent,
            None => {
                self.send_error(
                    client,
                    RoutingError::AgentOffline(entry.worker_key.to_string()),
                );
                return;
            }
        };

        // Multi-character or line-terminated input is a command dispatch;
        // single keystrokes are not audit-worthy.
        let audit_worthy =
            command.chars().count() > 1 || command.contains('\n') || command.contains('\r');

        agent.push(HubToAgent::Execute {
            client_id: client.id.to_string(),
            session_id: session_id.to_string(),
            command,
        });
        self.sessions.touch(&session_id);

        if audit_worthy {
            self.audit
                .record(
                    "command_dispatch",
                    serde_json::json!({ "sessionId": session_id.as_str() }),
                    Some(&client.principal),
                    Some(entry.worker_key.as_str()),
                )
                .await;
        }
    }

    /// Handle one frame from a registered agent
    pub async fn handle_agent_frame(&self, agent: &Arc<AgentEntry>, frame: AgentFrame) {
        match frame {
            AgentFrame::Register { name } => {
                // Registration is part of the handshake; a repeat is noise.
                tracing::debug!("Duplicate register from agent {} ({})", agent.key, name);
            }

            AgentFrame::Heartbeat => {
                agent.record_heartbeat();
                if agent.mark_online() {
                    self.broadcast_agent_list();
                }
            }

            AgentFrame::Output { session_id, output } => {
                let session_id = SessionId::new(session_id);
                let entry = match self.sessions.get(&session_id) {
                    Some(entry) => entry,
                    None => {
                        tracing::debug!(
                            "Dropping output: {}",
                            ResourceError::SessionDeleted(session_id.to_string())
                        );
                        return;
                    }
                };

                // Only the owning agent may emit output for a session.
                if entry.worker_key != agent.key {
                    tracing::warn!(
                        "{}: agent {} emitted output for session {} owned by {}",
                        RoutingError::AccessDenied,
                        agent.key,
                        session_id,
                        entry.worker_key
                    );
                    return;
                }

                if self.sessions.append_output(&session_id, &output).is_ok() {
                    self.fanout_room(
                        &session_id,
                        HubToClient::Output {
                            worker_id: agent.key.to_string(),
                            session_id: session_id.to_string(),
                            data: output,
                        },
                    );
                }
            }

            AgentFrame::SessionShellExited {
                session_id,
                exit_code,
                signal,
            } => {
                tracing::info!(
                    "Shell exited for session {}: code={:?} signal={:?}",
                    session_id,
                    exit_code,
                    signal
                );
                self.audit
                    .record(
                        "session_shell_exited",
                        serde_json::json!({
                            "sessionId": session_id,
                            "exitCode": exit_code,
                            "signal": signal,
                        }),
                        None,
                        Some(agent.key.as_str()),
                    )
                    .await;
            }
        }
    }

    /// Clean up after a client link closes
    pub async fn client_disconnected(&self, client_id: &ClientId) {
        self.clients.remove(client_id);

        let affected = self.rooms.detach_client(client_id);
        let mut notified: HashSet<AgentKey> = HashSet::new();

        for session_id in &affected {
            if let Some(entry) = self.sessions.get(session_id) {
                if notified.insert(entry.worker_key.clone()) {
                    if let Some(agent) = self.agents.get_online(&entry.worker_key) {
                        agent.push(HubToAgent::ClientDisconnect {
                            client_id: client_id.to_string(),
                        });
                    }
                }
            }
            self.reconcile_session(session_id, client_id);
        }

        tracing::debug!(
            "Client {} disconnected ({} attachments released)",
            client_id,
            affected.len()
        );
    }

    /// Clean up after an agent link closes.
    ///
    /// Only the connection that owns the registry entry may flip it
    /// offline; a displaced connection's teardown is a no-op.
    pub fn agent_disconnected(&self, entry: &Arc<AgentEntry>) {
        if self.agents.mark_offline(&entry.key, entry.conn_id) {
            tracing::info!("Agent {} disconnected", entry.key);
            self.broadcast_agent_list();
        }
    }

    /// Push the current agent catalogue to every client
    pub fn broadcast_agent_list(&self) {
        self.clients.broadcast(HubToClient::AgentList {
            agents: self.agents.snapshot(),
        });
    }

    /// Push the current session catalogue to every client
    pub fn broadcast_session_list(&self) {
        self.clients.broadcast(HubToClient::SessionList {
            sessions: self.sessions.list(),
        });
    }

    fn reconcile_session(&self, session_id: &SessionId, client: &ClientId) {
        let viewports = self.rooms.viewports(session_id);
        let agent_tx = self
            .sessions
            .get(session_id)
            .and_then(|entry| self.agents.get_online(&entry.worker_key))
            .map(|agent| agent.tx.clone());
        self.reconciler
            .reconcile(session_id, &viewports, client, agent_tx);
    }

    fn fanout_room(&self, session_id: &SessionId, frame: HubToClient) {
        for member in self.rooms.members(session_id) {
            if let Some(handle) = self.clients.get(&member) {
                handle.push(frame.clone());
            }
        }
    }

    fn send_error(&self, client: &Arc<ClientHandle>, error: impl std::fmt::Display) {
        client.push(HubToClient::Error {
            message: error.to_string(),
        });
    }
}
