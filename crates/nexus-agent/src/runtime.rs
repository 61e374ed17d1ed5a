//! Agent event loop
//!
//! One select! loop joins the hub link, PTY reader events, heartbeat
//! ticks, and debounced respawns. PTYs are spawned lazily on the first
//! execute or resize for an unknown session id, survive hub outages, and
//! respawn after shell exit unless explicitly killed.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use nexus_core::config::AgentConfig;
use nexus_core::types::SessionId;
use nexus_protocol::{AgentFrame, HubToAgent, TerminalSize};

use crate::backoff::ExponentialBackoff;
use crate::link::HubLink;
use crate::pty::{PtyEvent, PtyManager, SpawnPolicy};
use crate::registry::{SessionRegistry, SessionState};

/// Delay between shell exit and automatic respawn
pub const RESPAWN_DEBOUNCE: Duration = Duration::from_millis(500);

/// Buffered PTY events between reader threads and the loop
const PTY_EVENT_CAPACITY: usize = 256;

/// The agent daemon's long-running state
pub struct AgentRuntime {
    config: AgentConfig,
    name: String,
    policy: SpawnPolicy,
    manager: PtyManager,
    registry: SessionRegistry,
    pty_rx: mpsc::Receiver<PtyEvent>,
    respawn_tx: mpsc::Sender<SessionId>,
    respawn_rx: mpsc::Receiver<SessionId>,
}

impl AgentRuntime {
    /// Build the runtime from configuration
    pub fn new(config: AgentConfig) -> Self {
        let name = if config.name.trim().is_empty() {
            gethostname::gethostname().to_string_lossy().into_owned()
        } else {
            config.name.clone()
        };
        let policy = SpawnPolicy::from_config(&config);

        let (pty_tx, pty_rx) = mpsc::channel(PTY_EVENT_CAPACITY);
        let (respawn_tx, respawn_rx) = mpsc::channel(64);

        Self {
            manager: PtyManager::new(pty_tx),
            config,
            name,
            policy,
            registry: SessionRegistry::new(),
            pty_rx,
            respawn_tx,
            respawn_rx,
        }
    }

    /// The agent's display name on the hub
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run forever: connect, serve, reconnect with backoff.
    ///
    /// PTYs are kept across outages; output emitted while disconnected is
    /// dropped from the wire (the PTY's kernel buffer holds the rest).
    pub async fn run(mut self) -> Result<()> {
        let mut backoff = ExponentialBackoff::new();

        loop {
            match HubLink::connect(&self.config, &self.name).await {
                Ok(mut link) => {
                    tracing::info!("Connected to hub as {}", self.name);
                    backoff.reset();
                    self.run_connected(&mut link).await;
                    tracing::warn!(
                        "Hub link lost; {} PTYs stay alive while reconnecting",
                        self.registry.len()
                    );
                }
                Err(e) => {
                    tracing::warn!("Hub connection failed: {:#}", e);
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!("Reconnecting in {:?}", delay);
            self.idle_for(delay).await;
        }
    }

    /// Serve one live link until it drops
    async fn run_connected(&mut self, link: &mut HubLink) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat);

        loop {
            tokio::select! {
                frame = link.recv() => {
                    let Some(frame) = frame else { return };
                    self.handle_hub_frame(frame);
                }
                Some(event) = self.pty_rx.recv() => {
                    if self.handle_pty_event(Some(link), event).await.is_err() {
                        return;
                    }
                }
                Some(session_id) = self.respawn_rx.recv() => {
                    if self.handle_respawn_due(Some(link), session_id).await.is_err() {
                        return;
                    }
                }
                _ = heartbeat.tick() => {
                    if link.send(&AgentFrame::Heartbeat).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Sit out a backoff delay while keeping local PTY lifecycle moving
    async fn idle_for(&mut self, delay: Duration) {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                Some(event) = self.pty_rx.recv() => {
                    let _ = self.handle_pty_event(None, event).await;
                }
                Some(session_id) = self.respawn_rx.recv() => {
                    let _ = self.handle_respawn_due(None, session_id).await;
                }
            }
        }
    }

    fn handle_hub_frame(&mut self, frame: HubToAgent) {
        match frame {
            HubToAgent::Execute {
                session_id,
                command,
                ..
            } => {
                let session_id = SessionId::new(session_id);
                self.ensure_session(&session_id, TerminalSize::default());
                if let Some(state) = self.registry.get_mut(&session_id) {
                    if let Some(pty) = state.pty.as_mut() {
                        if let Err(e) = pty.write(command.as_bytes()) {
                            // A write race with shell exit; the exit event
                            // handles the rest.
                            tracing::debug!(
                                "Write to session {} failed: {:#}",
                                session_id,
                                e
                            );
                        }
                    }
                }
            }

            HubToAgent::Resize {
                client_id,
                session_id,
                cols,
                rows,
            } => {
                let size = TerminalSize::new(cols, rows);
                let session_id = SessionId::new(session_id);
                self.ensure_session(&session_id, size);
                if let Some(state) = self.registry.get_mut(&session_id) {
                    if let Some(target) = state.record_viewport(&client_id, size) {
                        apply_resize(state, target);
                    }
                }
            }

            HubToAgent::KillSession { session_id } => {
                let session_id = SessionId::new(session_id);
                if let Some(state) = self.registry.get_mut(&session_id) {
                    tracing::info!("Killing session {} (no respawn)", session_id);
                    state.killed = true;
                    if let Some(pty) = &state.pty {
                        pty.kill();
                    } else {
                        // Exited and awaiting respawn: nothing to kill,
                        // the flag alone retires it.
                        self.registry.remove(&session_id);
                    }
                }
            }

            HubToAgent::ClientDisconnect { client_id } => {
                let mut resizes: Vec<(SessionId, TerminalSize)> = Vec::new();
                for state in self.registry.iter_mut() {
                    if let Some(target) = state.drop_viewport(&client_id) {
                        resizes.push((state.id.clone(), target));
                    }
                }
                for (session_id, target) in resizes {
                    if let Some(state) = self.registry.get_mut(&session_id) {
                        apply_resize(state, target);
                    }
                }
            }
        }
    }

    async fn handle_pty_event(
        &mut self,
        link: Option<&mut HubLink>,
        event: PtyEvent,
    ) -> Result<()> {
        match event {
            PtyEvent::Output { session_id, data } => {
                if !self.registry.contains(&session_id) {
                    return Ok(());
                }
                if let Some(link) = link {
                    link.send(&AgentFrame::Output {
                        session_id: session_id.to_string(),
                        output: String::from_utf8_lossy(&data).into_owned(),
                    })
                    .await?;
                }
            }

            PtyEvent::Exited {
                session_id,
                exit_code,
            } => {
                let Some(state) = self.registry.get_mut(&session_id) else {
                    return Ok(());
                };
                state.pty = None;
                state.last_exit = exit_code;

                if state.killed {
                    // Explicit close: the hub already removed the session.
                    self.registry.remove(&session_id);
                    return Ok(());
                }

                tracing::info!(
                    "Shell for session {} exited with code {:?}",
                    session_id,
                    exit_code
                );
                if let Some(link) = link {
                    link.send(&AgentFrame::SessionShellExited {
                        session_id: session_id.to_string(),
                        exit_code,
                        signal: None,
                    })
                    .await?;
                }

                if self.config.auto_restart_shell {
                    let respawn_tx = self.respawn_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(RESPAWN_DEBOUNCE).await;
                        let _ = respawn_tx.send(session_id).await;
                    });
                } else {
                    self.registry.remove(&session_id);
                }
            }
        }
        Ok(())
    }

    async fn handle_respawn_due(
        &mut self,
        link: Option<&mut HubLink>,
        session_id: SessionId,
    ) -> Result<()> {
        let Some(state) = self.registry.get_mut(&session_id) else {
            return Ok(());
        };
        if state.killed || state.is_running() {
            return Ok(());
        }

        let banner = respawn_banner(state.last_exit);
        let size = state.applied;

        match self.manager.spawn(&session_id, &self.policy, size) {
            Ok(handle) => {
                if let Some(state) = self.registry.get_mut(&session_id) {
                    state.pty = Some(handle);
                }
                if let Some(link) = link {
                    link.send(&AgentFrame::Output {
                        session_id: session_id.to_string(),
                        output: banner,
                    })
                    .await?;
                }
            }
            Err(e) => {
                tracing::error!("Respawn for session {} failed: {:#}", session_id, e);
                self.registry.remove(&session_id);
            }
        }
        Ok(())
    }

    /// Spawn a session lazily on first contact
    fn ensure_session(&mut self, session_id: &SessionId, size: TerminalSize) {
        if self.registry.contains(session_id) {
            return;
        }
        match self.manager.spawn(session_id, &self.policy, size) {
            Ok(handle) => {
                self.registry
                    .insert(SessionState::new(session_id.clone(), handle, size));
            }
            Err(e) => {
                tracing::error!("Spawn for session {} failed: {:#}", session_id, e);
            }
        }
    }
}

fn apply_resize(state: &mut SessionState, target: TerminalSize) {
    if let Some(pty) = &state.pty {
        if let Err(e) = pty.resize(target) {
            tracing::warn!("Resize of session {} failed: {:#}", state.id, e);
        }
    }
}

/// Visible banner injected into the stream before a respawned shell
fn respawn_banner(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(
            "\r\n\x1b[33m[shell exited with code {}; restarting]\x1b[0m\r\n",
            code
        ),
        None => "\r\n\x1b[33m[shell exited; restarting]\x1b[0m\r\n".to_string(),
    }
}
