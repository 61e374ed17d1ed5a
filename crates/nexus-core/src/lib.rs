//! nexus-core: Shared abstractions for the Nexus terminal relay
//!
//! This crate provides the domain id types, the error taxonomy, the
//! environment-driven configuration, and small utilities shared by the hub
//! and agent binaries.

pub mod config;
pub mod error;
pub mod secure;
pub mod time;
pub mod types;

pub use error::{AuthError, FatalError, ResourceError, RoutingError};
pub use types::{AgentKey, ClientId, SessionId};
