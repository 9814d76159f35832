//! # Session Consistency Guard
//!
//! Read-your-writes enforcement per logical session.
//!
//! Each write stamps a per-session watermark. Reads from that session are
//! forced to the primary while the watermark is younger than the configured
//! consistency window, since the primary is the only endpoint guaranteed to
//! have the write. Once the window elapses the watermark is expired and the
//! session's reads return to normal replica selection.
//!
//! Expired watermarks are removed lazily on access and by a periodic sweep,
//! so memory does not grow with abandoned sessions. Per-session updates only
//! touch that session's own map entry; unrelated sessions never contend.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::endpoint::{EndpointId, OperationDescriptor, SessionId};
use crate::routing::{RouteTarget, RoutingPolicy};

/// Timestamp of a session's most recent write
#[derive(Debug, Clone, Copy)]
pub struct SessionWatermark {
    last_write_at: Instant,
}

impl SessionWatermark {
    fn is_expired(&self, window: Duration) -> bool {
        self.last_write_at.elapsed() >= window
    }
}

/// Tracks recent writes per session and gates read routing accordingly
pub struct SessionConsistencyGuard {
    policy: Arc<RoutingPolicy>,
    watermarks: DashMap<SessionId, SessionWatermark>,
    window: Duration,
}

impl SessionConsistencyGuard {
    pub fn new(policy: Arc<RoutingPolicy>, window: Duration) -> Self {
        Self {
            policy,
            watermarks: DashMap::new(),
            window,
        }
    }

    /// Stamp the session's watermark with the current time. Called after
    /// every successful write.
    pub fn record_write(&self, session_id: SessionId) {
        self.watermarks.insert(
            session_id,
            SessionWatermark {
                last_write_at: Instant::now(),
            },
        );
    }

    /// Route a read: sessions inside their consistency window are pinned to
    /// the primary, everything else delegates to the routing policy.
    pub fn route_read(
        &self,
        operation: &OperationDescriptor,
        eligible: &[EndpointId],
    ) -> RouteTarget {
        if let Some(session_id) = operation.session_id {
            if self.within_window(&session_id) {
                return RouteTarget::Primary;
            }
        }
        self.policy.route(operation, eligible)
    }

    /// Whether the session has a live watermark. Expired entries are removed
    /// on the way out.
    fn within_window(&self, session_id: &SessionId) -> bool {
        let live = match self.watermarks.get(session_id) {
            Some(watermark) => !watermark.is_expired(self.window),
            None => return false,
        };
        if !live {
            self.watermarks
                .remove_if(session_id, |_, watermark| watermark.is_expired(self.window));
        }
        live
    }

    /// Drop the session's watermark immediately (session teardown)
    pub fn end_session(&self, session_id: &SessionId) {
        self.watermarks.remove(session_id);
    }

    /// Remove every expired watermark. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.watermarks.len();
        let window = self.window;
        self.watermarks
            .retain(|_, watermark| !watermark.is_expired(window));
        before - self.watermarks.len()
    }

    /// Number of sessions currently holding a watermark
    pub fn tracked_sessions(&self) -> usize {
        self.watermarks.len()
    }

    /// Spawn the periodic sweep task for abandoned sessions.
    pub fn start_sweeper(self: &Arc<Self>, sweep_interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let guard = Arc::clone(self);

        let join = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = guard.sweep();
                        if removed > 0 {
                            debug!(removed, "Swept expired session watermarks");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        info!(
            window_ms = self.window.as_millis() as u64,
            "Session consistency guard started"
        );

        SweeperHandle { shutdown_tx, join }
    }
}

/// Handle owning the background sweep task
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
