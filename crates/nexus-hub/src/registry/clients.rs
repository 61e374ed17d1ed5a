//! Client registry and per-session rooms
//!
//! Clients subscribe to sessions by joining a room and must declare a
//! viewport to participate in dimension reconciliation. Output fans out to
//! room members only; list updates go to the whole broadcast set.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use nexus_core::error::ResourceError;
use nexus_core::types::{ClientId, SessionId};
use nexus_protocol::{HubToClient, TerminalSize};

/// One live client connection
pub struct ClientHandle {
    /// Connection id assigned by the hub
    pub id: ClientId,
    /// Authenticated principal
    pub principal: String,
    /// Bounded outbound queue to this client's connection
    pub tx: mpsc::Sender<HubToClient>,
    /// Cancels this client's connection
    pub cancel: CancellationToken,
}

impl ClientHandle {
    /// Queue a frame to this client.
    ///
    /// Overflow of the bounded queue closes the connection; the client
    /// reconnects with backoff.
    pub fn push(&self, frame: HubToClient) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    "{} for client {}, disconnecting",
                    ResourceError::QueueOverflow,
                    self.id
                );
                self.cancel.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// The hub's broadcast set of connected clients
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientHandle>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Add a client connection
    pub fn insert(&self, handle: Arc<ClientHandle>) {
        self.clients.insert(handle.id.clone(), handle);
    }

    /// Remove a client connection
    pub fn remove(&self, id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.remove(id).map(|(_, v)| v)
    }

    /// Get a client by id
    pub fn get(&self, id: &ClientId) -> Option<Arc<ClientHandle>> {
        self.clients.get(id).map(|r| Arc::clone(&r))
    }

    /// Push a frame to every connected client
    pub fn broadcast(&self, frame: HubToClient) {
        for client in self.clients.iter() {
            client.push(frame.clone());
        }
    }

    /// Number of connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session viewer rooms with reported viewports
pub struct Rooms {
    rooms: DashMap<SessionId, HashMap<ClientId, TerminalSize>>,
}

impl Rooms {
    /// Create an empty room map
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Attach a viewer to a session's room with its declared viewport
    pub fn join(&self, session: &SessionId, client: &ClientId, size: TerminalSize) {
        self.rooms
            .entry(session.clone())
            .or_default()
            .insert(client.clone(), size);
    }

    /// Update an attached viewer's viewport.
    ///
    /// Returns false when the client is not attached; a resize without a
    /// prior join does not create an attachment.
    pub fn update_viewport(
        &self,
        session: &SessionId,
        client: &ClientId,
        size: TerminalSize,
    ) -> bool {
        match self.rooms.get_mut(session) {
            Some(mut viewers) => match viewers.get_mut(client) {
                Some(slot) => {
                    *slot = size;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Detach a viewer from a session's room
    pub fn leave(&self, session: &SessionId, client: &ClientId) -> bool {
        let removed = match self.rooms.get_mut(session) {
            Some(mut viewers) => viewers.remove(client).is_some(),
            None => false,
        };
        self.rooms.retain(|_, viewers| !viewers.is_empty());
        removed
    }

    /// Drop a session's room entirely (session closed)
    pub fn remove_session(&self, session: &SessionId) {
        self.rooms.remove(session);
    }

    /// Detach a client from every room it is in.
    ///
    /// Returns the sessions it was attached to, for reconciliation.
    pub fn detach_client(&self, client: &ClientId) -> Vec<SessionId> {
        let mut affected = Vec::new();
        for mut room in self.rooms.iter_mut() {
            if room.value_mut().remove(client).is_some() {
                affected.push(room.key().clone());
            }
        }
        self.rooms.retain(|_, viewers| !viewers.is_empty());
        affected
    }

    /// Whether a client is attached to a session
    pub fn is_member(&self, session: &SessionId, client: &ClientId) -> bool {
        self.rooms
            .get(session)
            .map(|viewers| viewers.contains_key(client))
            .unwrap_or(false)
    }

    /// Current member ids of a session's room
    pub fn members(&self, session: &SessionId) -> Vec<ClientId> {
        self.rooms
            .get(session)
            .map(|viewers| viewers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current reported viewports of a session's room
    pub fn viewports(&self, session: &SessionId) -> Vec<TerminalSize> {
        self.rooms
            .get(session)
            .map(|viewers| viewers.values().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, ClientId, ClientId) {
        (
            SessionId::new("s-1"),
            ClientId::new("c-1"),
            ClientId::new("c-2"),
        )
    }

    #[test]
    fn test_join_and_members() {
        let rooms = Rooms::new();
        let (session, c1, c2) = ids();

        rooms.join(&session, &c1, TerminalSize::new(80, 24));
        rooms.join(&session, &c2, TerminalSize::new(100, 40));

        let mut members = rooms.members(&session);
        members.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(members.len(), 2);
        assert!(rooms.is_member(&session, &c1));
    }

    #[test]
    fn test_leave_removes_viewer() {
        let rooms = Rooms::new();
        let (session, c1, c2) = ids();

        rooms.join(&session, &c1, TerminalSize::new(80, 24));
        rooms.join(&session, &c2, TerminalSize::new(100, 40));

        assert!(rooms.leave(&session, &c2));
        assert!(!rooms.leave(&session, &c2));
        assert_eq!(rooms.members(&session), vec![c1]);
    }

    #[test]
    fn test_update_viewport_requires_membership() {
        let rooms = Rooms::new();
        let (session, c1, c2) = ids();

        rooms.join(&session, &c1, TerminalSize::new(80, 24));

        assert!(rooms.update_viewport(&session, &c1, TerminalSize::new(120, 30)));
        assert!(!rooms.update_viewport(&session, &c2, TerminalSize::new(50, 10)));

        assert_eq!(rooms.viewports(&session), vec![TerminalSize::new(120, 30)]);
    }

    #[test]
    fn test_detach_client_reports_affected_sessions() {
        let rooms = Rooms::new();
        let (s1, c1, c2) = ids();
        let s2 = SessionId::new("s-2");

        rooms.join(&s1, &c1, TerminalSize::new(80, 24));
        rooms.join(&s2, &c1, TerminalSize::new(80, 24));
        rooms.join(&s2, &c2, TerminalSize::new(100, 40));

        let mut affected = rooms.detach_client(&c1);
        affected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(affected, vec![s1.clone(), s2.clone()]);

        assert!(rooms.members(&s1).is_empty());
        assert_eq!(rooms.members(&s2), vec![c2]);
    }

    #[test]
    fn test_client_registry_broadcast_and_overflow() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let handle = Arc::new(ClientHandle {
            id: ClientId::new("c-1"),
            principal: "admin".to_string(),
            tx,
            cancel: cancel.clone(),
        });
        registry.insert(Arc::clone(&handle));

        registry.broadcast(HubToClient::SessionClosed {
            session_id: "s-1".to_string(),
        });
        registry.broadcast(HubToClient::SessionClosed {
            session_id: "s-2".to_string(),
        });
        assert!(rx.try_recv().is_ok());

        // Two queued, one drained, one free slot: next two pushes overflow.
        assert!(handle.push(HubToClient::SessionClosed {
            session_id: "s-3".to_string(),
        }));
        assert!(!handle.push(HubToClient::SessionClosed {
            session_id: "s-4".to_string(),
        }));
        assert!(cancel.is_cancelled());
    }
}
