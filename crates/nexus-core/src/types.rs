//! Core domain id types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable key identifying an agent, case-insensitive.
///
/// Two agents registering under display names that differ only in case
/// collapse under one key; the newest connection wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentKey(String);

impl AgentKey {
    /// Derive the key from an agent's display name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Get the raw key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque, globally unique session identifier.
///
/// Sessions are created by clients with an id of their choosing; the id is
/// immutable for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for one live client connection, assigned by the hub
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a raw id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_key_case_insensitive() {
        assert_eq!(AgentKey::new("Worker1"), AgentKey::new("worker1"));
        assert_eq!(AgentKey::new("  WORKER1 "), AgentKey::new("worker1"));
    }

    #[test]
    fn test_agent_key_distinct_names() {
        assert_ne!(AgentKey::new("worker1"), AgentKey::new("worker2"));
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new("s-42");
        assert_eq!(format!("{}", id), "s-42");
    }
}
