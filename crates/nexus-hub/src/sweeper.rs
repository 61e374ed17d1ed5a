//! Agent liveness sweeper
//!
//! A periodic task that transitions agents to offline once their
//! heartbeats go stale, and broadcasts the updated agent list when
//! anything changed. Connections are not forcibly closed on timeout; a
//! stalled sender gets grace until its link actually drops.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::state::HubState;

/// Sweep cadence
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Start the liveness sweep task
pub fn spawn(state: Arc<HubState>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let timeout = state.config.worker_health_timeout;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if state.agents.sweep(timeout) {
                        state.broadcast_agent_list();
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("Liveness sweeper shutting down");
                    break;
                }
            }
        }
    })
}
