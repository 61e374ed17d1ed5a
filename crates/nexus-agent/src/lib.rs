//! nexus-agent: Host-side agent for the Nexus terminal relay
//!
//! The agent runs on each target host, maintains a single outbound
//! websocket link to the hub, and owns the local PTY processes. PTYs
//! survive hub outages; the link reconnects with jittered backoff.

pub mod backoff;
pub mod link;
pub mod pty;
pub mod registry;
pub mod runtime;

pub use runtime::AgentRuntime;
