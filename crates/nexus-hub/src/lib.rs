//! nexus-hub: Central relay for the Nexus terminal system
//!
//! The hub accepts authenticated client and agent links, owns session
//! metadata and output tails, routes keystrokes and output with
//! per-session ordering, and reconciles terminal dimensions across
//! simultaneous viewers.

pub mod auth;
pub mod http;
pub mod reconciler;
pub mod registry;
pub mod router;
pub mod sessions;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod ws;

pub use state::HubState;
