//! Viewport reconciler
//!
//! Multiple clients can watch one session at different sizes. The PTY gets
//! the component-wise minimum over every attached viewer, so no viewer
//! sees lines wrapped for a larger sibling. Resize storms are coalesced to
//! at most one resize per debounce window per session; when the viewer set
//! becomes empty the last applied size is retained.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use nexus_core::types::{ClientId, SessionId};
use nexus_protocol::{HubToAgent, TerminalSize};

/// Debounce window between resizes of one session
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Compute the dimensions to apply for a viewer set.
///
/// Returns None for an empty set: with nobody attached the previous size
/// stays in force.
pub fn target_size(viewports: &[TerminalSize]) -> Option<TerminalSize> {
    viewports.iter().copied().reduce(TerminalSize::min)
}

struct Pending {
    size: TerminalSize,
    client: ClientId,
}

/// Debounced dimension reconciliation per session
pub struct Reconciler {
    applied: DashMap<SessionId, TerminalSize>,
    pending: DashMap<SessionId, Pending>,
    inflight: DashMap<SessionId, ()>,
    debounce: Duration,
}

impl Reconciler {
    /// Create a reconciler with the standard debounce window
    pub fn new() -> Self {
        Self::with_debounce(RESIZE_DEBOUNCE)
    }

    /// Create a reconciler with a custom debounce window (tests)
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            applied: DashMap::new(),
            pending: DashMap::new(),
            inflight: DashMap::new(),
            debounce,
        }
    }

    /// Last dimensions sent to the agent for a session
    pub fn applied(&self, session: &SessionId) -> Option<TerminalSize> {
        self.applied.get(session).map(|r| *r)
    }

    /// Drop all state for a session (session closed)
    pub fn forget(&self, session: &SessionId) {
        self.applied.remove(session);
        self.pending.remove(session);
        self.inflight.remove(session);
    }

    /// Recompute a session's dimensions after an attach, detach, or resize.
    ///
    /// If the min over the current viewer set differs from the applied
    /// size, a resize is scheduled on the agent's queue after the debounce
    /// window. Recomputes landing inside the window just replace the
    /// pending target; the scheduled task reads the latest at fire time.
    pub fn reconcile(
        self: &Arc<Self>,
        session: &SessionId,
        viewports: &[TerminalSize],
        client: &ClientId,
        agent_tx: Option<mpsc::Sender<HubToAgent>>,
    ) {
        let Some(target) = target_size(viewports) else {
            return;
        };
        if self.applied(session) == Some(target) {
            // Idempotent: repeating the current size schedules nothing,
            // unless a different target is already pending.
            if self.pending.get(session).is_none() {
                return;
            }
        }

        self.pending.insert(
            session.clone(),
            Pending {
                size: target,
                client: client.clone(),
            },
        );

        let Some(agent_tx) = agent_tx else {
            // Agent offline: leave the target pending; the next reconcile
            // with a live agent delivers it.
            return;
        };

        if self.inflight.insert(session.clone(), ()).is_some() {
            return;
        }

        let reconciler = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(reconciler.debounce).await;
            reconciler.inflight.remove(&session);

            let Some((_, pending)) = reconciler.pending.remove(&session) else {
                return;
            };
            if reconciler.applied(&session) == Some(pending.size) {
                return;
            }
            reconciler.applied.insert(session.clone(), pending.size);

            // Best effort: a dropped or full queue means the agent link is
            // going away; the next reconcile repeats the target.
            let _ = agent_tx.try_send(HubToAgent::Resize {
                client_id: pending.client.to_string(),
                session_id: session.to_string(),
                cols: pending.size.cols,
                rows: pending.size.rows,
            });
        });
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_target_size_is_min_over_viewers() {
        let viewers = vec![TerminalSize::new(80, 40), TerminalSize::new(100, 24)];
        assert_eq!(target_size(&viewers), Some(TerminalSize::new(80, 24)));
    }

    #[test]
    fn test_target_size_empty_set() {
        assert_eq!(target_size(&[]), None);
    }

    #[test]
    fn test_target_size_single_viewer() {
        let viewers = vec![TerminalSize::new(120, 30)];
        assert_eq!(target_size(&viewers), Some(TerminalSize::new(120, 30)));
    }

    async fn expect_resize(
        rx: &mut mpsc::Receiver<HubToAgent>,
        cols: u16,
        rows: u16,
    ) {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("resize not delivered")
            .expect("channel closed")
        {
            HubToAgent::Resize {
                cols: got_cols,
                rows: got_rows,
                ..
            } => {
                assert_eq!((got_cols, got_rows), (cols, rows));
            }
            other => panic!("Expected resize, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reconcile_sends_min() {
        let reconciler = Arc::new(Reconciler::with_debounce(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(8);
        let session = SessionId::new("s-1");
        let client = ClientId::new("c-1");

        let viewers = vec![TerminalSize::new(80, 24), TerminalSize::new(100, 40)];
        reconciler.reconcile(&session, &viewers, &client, Some(tx));

        expect_resize(&mut rx, 80, 24).await;
        assert_eq!(reconciler.applied(&session), Some(TerminalSize::new(80, 24)));
    }

    #[tokio::test]
    async fn test_reconcile_coalesces_storm() {
        let reconciler = Arc::new(Reconciler::with_debounce(Duration::from_millis(20)));
        let (tx, mut rx) = mpsc::channel(8);
        let session = SessionId::new("s-1");
        let client = ClientId::new("c-1");

        for cols in [100u16, 95, 90, 85, 80] {
            let viewers = vec![TerminalSize::new(cols, 24)];
            reconciler.reconcile(&session, &viewers, &client, Some(tx.clone()));
        }

        // Only the final target of the storm is delivered.
        expect_resize(&mut rx, 80, 24).await;
        sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_idempotent_on_same_size() {
        let reconciler = Arc::new(Reconciler::with_debounce(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(8);
        let session = SessionId::new("s-1");
        let client = ClientId::new("c-1");
        let viewers = vec![TerminalSize::new(80, 24)];

        reconciler.reconcile(&session, &viewers, &client, Some(tx.clone()));
        expect_resize(&mut rx, 80, 24).await;

        // Same viewer set again: nothing new is scheduled.
        reconciler.reconcile(&session, &viewers, &client, Some(tx.clone()));
        sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_empty_set_retains_applied() {
        let reconciler = Arc::new(Reconciler::with_debounce(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(8);
        let session = SessionId::new("s-1");
        let client = ClientId::new("c-1");

        reconciler.reconcile(
            &session,
            &[TerminalSize::new(80, 24)],
            &client,
            Some(tx.clone()),
        );
        expect_resize(&mut rx, 80, 24).await;

        // All viewers left: size stays in force, no resize issued.
        reconciler.reconcile(&session, &[], &client, Some(tx));
        sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(reconciler.applied(&session), Some(TerminalSize::new(80, 24)));
    }

    #[tokio::test]
    async fn test_forget_clears_state() {
        let reconciler = Arc::new(Reconciler::with_debounce(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(8);
        let session = SessionId::new("s-1");
        let client = ClientId::new("c-1");

        reconciler.reconcile(
            &session,
            &[TerminalSize::new(80, 24)],
            &client,
            Some(tx),
        );
        expect_resize(&mut rx, 80, 24).await;

        reconciler.forget(&session);
        assert_eq!(reconciler.applied(&session), None);
    }
}
