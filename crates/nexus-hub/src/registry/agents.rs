//! Agent registry
//!
//! Catalogue of agents keyed by their case-insensitive name. Entries keep
//! the live outbound channel, the last heartbeat, and the online flag the
//! liveness sweeper maintains. Agents that disconnect stay listed as
//! offline until a new connection under the same key replaces them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nexus_core::error::ResourceError;
use nexus_core::time::current_time_millis;
use nexus_core::types::AgentKey;
use nexus_protocol::{AgentInfo, AgentStatus, HubToAgent};

/// One known agent
pub struct AgentEntry {
    /// Stable registry key
    pub key: AgentKey,
    /// Display name as registered
    pub name: String,
    /// Connection epoch; a reconnect gets a higher value
    pub conn_id: u64,
    /// Bounded outbound queue to this agent's connection
    pub tx: mpsc::Sender<HubToAgent>,
    /// Cancels this agent's connection
    pub cancel: CancellationToken,
    last_seen_millis: AtomicU64,
    online: AtomicBool,
}

impl AgentEntry {
    /// Update the last heartbeat timestamp
    pub fn record_heartbeat(&self) {
        self.last_seen_millis
            .store(current_time_millis(), Ordering::SeqCst);
    }

    /// Flip this entry online. Returns true if the status changed.
    ///
    /// A heartbeat from a connection that the sweeper marked offline
    /// (transient sender stall) brings it back without a reconnect.
    pub fn mark_online(&self) -> bool {
        !self.online.swap(true, Ordering::SeqCst)
    }

    /// Last heartbeat, epoch millis
    pub fn last_seen_millis(&self) -> u64 {
        self.last_seen_millis.load(Ordering::SeqCst)
    }

    /// Whether the agent currently counts as online
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Current status
    pub fn status(&self) -> AgentStatus {
        if self.is_online() {
            AgentStatus::Online
        } else {
            AgentStatus::Offline
        }
    }

    /// Queue a frame to this agent.
    ///
    /// Overflow of the bounded queue closes the connection; the agent
    /// reconnects and re-registers.
    pub fn push(&self, frame: HubToAgent) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "{} for agent {}, disconnecting",
                    ResourceError::QueueOverflow,
                    self.key
                );
                self.cancel.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Summary for an `agent_list` push
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.key.to_string(),
            name: self.name.clone(),
            status: self.status(),
            last_seen: self.last_seen_millis(),
        }
    }
}

/// Registry of known agents
pub struct AgentRegistry {
    agents: DashMap<AgentKey, Arc<AgentEntry>>,
    next_conn_id: AtomicU64,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Install a freshly connected agent.
    ///
    /// Duplicate names collapse under one key; the newest connection wins
    /// and the displaced one (if any) is returned so its link can be
    /// closed. Messages queued to the old connection are dropped with it.
    pub fn register(
        &self,
        name: &str,
        tx: mpsc::Sender<HubToAgent>,
        cancel: CancellationToken,
    ) -> (Arc<AgentEntry>, Option<Arc<AgentEntry>>) {
        let key = AgentKey::new(name);
        let entry = Arc::new(AgentEntry {
            key: key.clone(),
            name: name.trim().to_string(),
            conn_id: self.next_conn_id.fetch_add(1, Ordering::SeqCst),
            tx,
            cancel,
            last_seen_millis: AtomicU64::new(current_time_millis()),
            online: AtomicBool::new(true),
        });

        let displaced = self.agents.insert(key, Arc::clone(&entry));
        (entry, displaced)
    }

    /// Get an agent by key
    pub fn get(&self, key: &AgentKey) -> Option<Arc<AgentEntry>> {
        self.agents.get(key).map(|r| Arc::clone(&r))
    }

    /// Get an agent by key only if it is online
    pub fn get_online(&self, key: &AgentKey) -> Option<Arc<AgentEntry>> {
        self.get(key).filter(|entry| entry.is_online())
    }

    /// Mark an agent offline, but only for the connection that owns it.
    ///
    /// Returns true if the status actually changed. A stale disconnect
    /// (the key was already re-registered by a newer connection) is a
    /// no-op.
    pub fn mark_offline(&self, key: &AgentKey, conn_id: u64) -> bool {
        match self.agents.get(key) {
            Some(entry) if entry.conn_id == conn_id => {
                entry.online.swap(false, Ordering::SeqCst)
            }
            _ => false,
        }
    }

    /// Transition agents whose heartbeat is older than `timeout` to
    /// offline. Returns true if any status changed.
    pub fn sweep(&self, timeout: Duration) -> bool {
        let now = current_time_millis();
        let timeout_millis = timeout.as_millis() as u64;
        let mut changed = false;

        for entry in self.agents.iter() {
            if entry.is_online()
                && now.saturating_sub(entry.last_seen_millis()) > timeout_millis
            {
                entry.online.store(false, Ordering::SeqCst);
                tracing::info!(
                    "Agent {} missed heartbeats, marking offline",
                    entry.key
                );
                changed = true;
            }
        }
        changed
    }

    /// Summaries of every known agent, sorted by key
    pub fn snapshot(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self.agents.iter().map(|r| r.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Number of known agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
