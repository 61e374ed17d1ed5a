//! Error taxonomy for the Nexus relay
//!
//! Each kind is raised at its enforcement site: auth failures at the
//! handshake and HTTP surface, routing failures surfaced to the
//! originating client as `error` frames, resource exhaustion where the
//! offending connection is closed. Faults local to one connection never
//! affect other connections; faults local to one session never affect
//! other sessions. Only `FatalError` terminates the process.

use thiserror::Error;

/// Authentication and authorisation failures
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    /// Password did not match the stored record
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No admin principal has been configured yet
    #[error("Authentication is not configured")]
    NotConfigured,

    /// Setup was attempted but a principal already exists
    #[error("Authentication is already configured")]
    AlreadyConfigured,

    /// New password is shorter than 8 characters
    #[error("Password must be at least 8 characters")]
    WeakPassword,

    /// Bearer token missing, malformed, or failed verification
    #[error("Missing or invalid bearer token")]
    InvalidBearer,

    /// Bearer token expired
    #[error("Bearer token expired")]
    ExpiredBearer,

    /// Agent credential rejected
    #[error("Agent credential rejected")]
    UnauthorizedAgent,

    /// Setup attempted from a non-loopback peer without a valid ticket
    #[error("Setup not allowed from this origin")]
    SetupForbidden,
}

/// Message delivery failures, surfaced to the originating client
#[derive(Error, Debug)]
pub enum RoutingError {
    /// The session's owning agent has no live connection
    #[error("Agent {0} is offline")]
    AgentOffline(String),

    /// No session with the given id
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// The peer may not act on this target
    #[error("Access denied")]
    AccessDenied,
}

/// Per-connection resource exhaustion
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The peer's bounded outbound queue overflowed
    #[error("Outbound queue overflow")]
    QueueOverflow,

    /// Output arrived for a session that was deleted
    #[error("Session {0} was deleted")]
    SessionDeleted(String),
}

/// Unrecoverable boot or runtime failures; these abort the process
#[derive(Error, Debug)]
pub enum FatalError {
    /// NEXUS_JWT_SECRET is required outside development
    #[error("NEXUS_JWT_SECRET must be configured in production")]
    MissingSecret,

    /// The embedded store could not be opened
    #[error("Cannot open persistence: {0}")]
    Persistence(String),

    /// The listen socket could not be bound
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

impl FatalError {
    /// Process exit code for this failure.
    ///
    /// 1 for configuration faults, 2 for an unrecoverable listen failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Bind { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_exit_codes() {
        assert_eq!(FatalError::MissingSecret.exit_code(), 1);
        assert_eq!(
            FatalError::Persistence("disk full".to_string()).exit_code(),
            1
        );
        let bind = FatalError::Bind {
            addr: "0.0.0.0:3002".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(bind.exit_code(), 2);
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::WeakPassword.to_string(),
            "Password must be at least 8 characters"
        );
    }
}
