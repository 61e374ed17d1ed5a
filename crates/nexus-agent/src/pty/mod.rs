//! PTY ownership
//!
//! Spawning, I/O, and lifecycle for the pseudo-terminals this agent owns.

pub mod manager;
pub mod spawn;

pub use manager::{PtyEvent, PtyHandle, PtyManager};
pub use spawn::SpawnPolicy;
