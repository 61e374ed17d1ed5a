//! Agent-side session registry
//!
//! Per session: the PTY handle, the dimensions actually applied, the
//! per-client reported viewports, and the kill flag. Dimensions are
//! authoritative here; the policy (minimum over viewers, retain when no
//! viewers remain) mirrors the hub's reconciler exactly.

use std::collections::HashMap;

use nexus_core::types::SessionId;
use nexus_protocol::TerminalSize;

use crate::pty::PtyHandle;

/// One session the agent owns
pub struct SessionState {
    /// Session id as assigned by the hub
    pub id: SessionId,
    /// The live PTY, absent between exit and respawn
    pub pty: Option<PtyHandle>,
    /// Dimensions currently applied to the PTY
    pub applied: TerminalSize,
    /// Reported viewports by client connection id
    pub viewports: HashMap<String, TerminalSize>,
    /// Set by an explicit kill; blocks respawn permanently
    pub killed: bool,
    /// Exit code of the last shell exit, for the respawn banner
    pub last_exit: Option<i32>,
}

impl SessionState {
    /// Create state for a freshly spawned session
    pub fn new(id: SessionId, pty: PtyHandle, size: TerminalSize) -> Self {
        Self {
            id,
            pty: Some(pty),
            applied: size,
            viewports: HashMap::new(),
            killed: false,
            last_exit: None,
        }
    }

    /// Whether a shell is currently running
    pub fn is_running(&self) -> bool {
        self.pty.is_some()
    }

    /// Record a client's viewport and return the dimensions the PTY
    /// should have, if they changed.
    pub fn record_viewport(
        &mut self,
        client_id: &str,
        size: TerminalSize,
    ) -> Option<TerminalSize> {
        self.viewports.insert(client_id.to_string(), size);
        self.recompute()
    }

    /// Drop a client's viewport and return new dimensions, if changed
    pub fn drop_viewport(&mut self, client_id: &str) -> Option<TerminalSize> {
        if self.viewports.remove(client_id).is_none() {
            return None;
        }
        self.recompute()
    }

    /// Min over the current viewers; retains the applied size when the
    /// viewer set is empty. Returns Some only when the target differs
    /// from what is applied.
    fn recompute(&mut self) -> Option<TerminalSize> {
        let target = self
            .viewports
            .values()
            .copied()
            .reduce(TerminalSize::min)?;
        if target == self.applied {
            None
        } else {
            self.applied = target;
            Some(target)
        }
    }
}

/// The agent's session map
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionState>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Install a session
    pub fn insert(&mut self, state: SessionState) {
        self.sessions.insert(state.id.clone(), state);
    }

    /// Get a session by id
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(id)
    }

    /// Whether the registry holds a session
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove a session
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionState> {
        self.sessions.remove(id)
    }

    /// Iterate every session mutably (client disconnect sweep)
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SessionState> {
        self.sessions.values_mut()
    }

    /// Number of sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_without_pty(id: &str, size: TerminalSize) -> SessionState {
        SessionState {
            id: SessionId::new(id),
            pty: None,
            applied: size,
            viewports: HashMap::new(),
            killed: false,
            last_exit: None,
        }
    }

    #[test]
    fn test_record_viewport_min_wins() {
        let mut state = state_without_pty("s-1", TerminalSize::new(80, 24));

        // Same as applied: nothing to do.
        assert_eq!(state.record_viewport("c-1", TerminalSize::new(80, 24)), None);

        // A larger second viewer leaves the min unchanged.
        assert_eq!(
            state.record_viewport("c-2", TerminalSize::new(100, 40)),
            None
        );

        // The smaller viewer shrinking drags the PTY down with it.
        let resized = state.record_viewport("c-1", TerminalSize::new(60, 20));
        assert_eq!(resized, Some(TerminalSize::new(60, 20)));
        assert_eq!(state.applied, TerminalSize::new(60, 20));
    }

    #[test]
    fn test_drop_viewport_releases_min() {
        let mut state = state_without_pty("s-1", TerminalSize::new(80, 24));
        state.record_viewport("c-1", TerminalSize::new(80, 24));
        state.record_viewport("c-2", TerminalSize::new(120, 30));

        // The small viewer leaves: the survivor's size takes over.
        let resized = state.drop_viewport("c-1");
        assert_eq!(resized, Some(TerminalSize::new(120, 30)));
    }

    #[test]
    fn test_drop_last_viewport_retains_applied() {
        let mut state = state_without_pty("s-1", TerminalSize::new(80, 24));
        state.record_viewport("c-1", TerminalSize::new(80, 24));

        assert_eq!(state.drop_viewport("c-1"), None);
        assert_eq!(state.applied, TerminalSize::new(80, 24));
    }

    #[test]
    fn test_drop_unknown_viewport_noop() {
        let mut state = state_without_pty("s-1", TerminalSize::new(80, 24));
        assert_eq!(state.drop_viewport("c-9"), None);
    }

    #[test]
    fn test_registry_insert_remove() {
        let mut registry = SessionRegistry::new();
        registry.insert(state_without_pty("s-1", TerminalSize::default()));

        assert!(registry.contains(&SessionId::new("s-1")));
        assert_eq!(registry.len(), 1);

        registry.remove(&SessionId::new("s-1"));
        assert!(registry.is_empty());
    }
}
