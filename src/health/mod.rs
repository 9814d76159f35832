//! # Replica Health Tracking
//!
//! Near-real-time view of which replicas are usable for reads.
//!
//! ## Overview
//!
//! A background loop probes every replica on a fixed interval: dial, run the
//! lightweight status query, record measured lag and reachability. Probe
//! results are published as whole [`ReplicaStatus`] records, one entry per
//! replica, so routing reads a consistent snapshot without ever blocking on
//! the probe cycle.
//!
//! A probe failure marks the replica unreachable and nothing more; the next
//! tick retries automatically. When every replica is ineligible,
//! [`ReplicaHealthTracker::eligible_replicas`] returns the empty set and
//! callers fall back to the primary, which is degraded but correct.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::endpoint::{Endpoint, EndpointId};
use crate::error::BackendError;
use crate::pool::Connector;

/// Per-replica health record. Replaced wholesale on every probe.
#[derive(Debug, Clone)]
pub struct ReplicaStatus {
    pub endpoint: EndpointId,
    pub probed_at: DateTime<Utc>,
    /// Measured replication lag; `None` when the replica was unreachable
    pub lag: Option<Duration>,
    pub reachable: bool,
}

impl ReplicaStatus {
    /// Whether this replica may serve reads under the given lag threshold
    pub fn is_eligible(&self, lag_threshold: Duration) -> bool {
        self.reachable && self.lag.is_some_and(|lag| lag <= lag_threshold)
    }
}

/// Operator-facing summary of the replica fleet
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub total_replicas: usize,
    pub eligible_replicas: usize,
    pub statuses: Vec<ReplicaStatus>,
}

/// Maintains replica health state and runs the periodic probe cycle
pub struct ReplicaHealthTracker {
    replicas: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    config: HealthConfig,
    statuses: DashMap<EndpointId, ReplicaStatus>,
}

impl ReplicaHealthTracker {
    pub fn new(replicas: Vec<Endpoint>, connector: Arc<dyn Connector>, config: HealthConfig) -> Self {
        Self {
            replicas,
            connector,
            config,
            statuses: DashMap::new(),
        }
    }

    /// Probe every replica once, concurrently, and publish fresh status
    /// records.
    ///
    /// Never fails: an unreachable replica is recorded as such and retried
    /// on the next cycle.
    pub async fn probe_all(&self) {
        let probes = self
            .replicas
            .iter()
            .map(|replica| async move { (replica, self.probe_one(replica).await) });
        for (replica, status) in join_all(probes).await {
            self.log_transition(&status);
            self.statuses.insert(replica.id.clone(), status);
        }
    }

    async fn probe_one(&self, replica: &Endpoint) -> ReplicaStatus {
        let probe = async {
            let mut connection = self.connector.connect(replica).await?;
            let lag = connection.probe().await?;
            let _ = connection.close().await;
            Ok::<Duration, BackendError>(lag)
        };

        match timeout(self.config.probe_timeout(), probe).await {
            Ok(Ok(lag)) => {
                debug!(
                    endpoint = %replica.id,
                    lag_ms = lag.as_millis() as u64,
                    "Replica probe succeeded"
                );
                ReplicaStatus {
                    endpoint: replica.id.clone(),
                    probed_at: Utc::now(),
                    lag: Some(lag),
                    reachable: true,
                }
            }
            Ok(Err(error)) => {
                warn!(
                    endpoint = %replica.id,
                    error = %error,
                    "Replica probe failed, marking unreachable"
                );
                self.unreachable(replica)
            }
            Err(_elapsed) => {
                warn!(
                    endpoint = %replica.id,
                    timeout_ms = self.config.probe_timeout_ms,
                    "Replica probe timed out, marking unreachable"
                );
                self.unreachable(replica)
            }
        }
    }

    fn unreachable(&self, replica: &Endpoint) -> ReplicaStatus {
        ReplicaStatus {
            endpoint: replica.id.clone(),
            probed_at: Utc::now(),
            lag: None,
            reachable: false,
        }
    }

    /// Log when a replica crosses the eligibility boundary in either direction
    fn log_transition(&self, next: &ReplicaStatus) {
        let threshold = self.config.lag_threshold();
        let was_eligible = self
            .statuses
            .get(&next.endpoint)
            .map(|prev| prev.is_eligible(threshold));
        let now_eligible = next.is_eligible(threshold);

        match was_eligible {
            Some(true) if !now_eligible => {
                warn!(
                    endpoint = %next.endpoint,
                    reachable = next.reachable,
                    lag_ms = next.lag.map(|lag| lag.as_millis() as u64),
                    "🔴 Replica left the eligible set"
                );
            }
            Some(false) if now_eligible => {
                info!(
                    endpoint = %next.endpoint,
                    lag_ms = next.lag.map(|lag| lag.as_millis() as u64),
                    "🟢 Replica rejoined the eligible set"
                );
            }
            None if now_eligible => {
                info!(endpoint = %next.endpoint, "🟢 Replica eligible after first probe");
            }
            _ => {}
        }
    }

    /// Snapshot of replicas currently passing both reachability and lag
    /// checks, in configuration order. Non-blocking.
    pub fn eligible_replicas(&self) -> Vec<EndpointId> {
        let threshold = self.config.lag_threshold();
        self.replicas
            .iter()
            .filter(|replica| {
                self.statuses
                    .get(&replica.id)
                    .map(|status| status.is_eligible(threshold))
                    .unwrap_or(false)
            })
            .map(|replica| replica.id.clone())
            .collect()
    }

    /// Latest status record for one replica, if it has been probed yet
    pub fn status(&self, endpoint: &EndpointId) -> Option<ReplicaStatus> {
        self.statuses.get(endpoint).map(|entry| entry.clone())
    }

    pub fn health_summary(&self) -> HealthSummary {
        let statuses: Vec<ReplicaStatus> = self
            .replicas
            .iter()
            .filter_map(|replica| self.status(&replica.id))
            .collect();
        HealthSummary {
            total_replicas: self.replicas.len(),
            eligible_replicas: self.eligible_replicas().len(),
            statuses,
        }
    }

    /// Spawn the periodic probe loop. Runs independently of request traffic
    /// until the returned handle is shut down.
    pub fn start(self: Arc<Self>) -> HealthTrackerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let probe_interval = self.config.probe_interval();

        info!(
            replicas = self.replicas.len(),
            probe_interval_ms = self.config.probe_interval_ms,
            lag_threshold_ms = self.config.lag_threshold_ms,
            "Replica health tracker started"
        );

        let join = tokio::spawn(async move {
            let mut ticker = interval(probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.probe_all().await,
                    _ = shutdown_rx.changed() => {
                        debug!("Replica health tracker stopping");
                        break;
                    }
                }
            }
        });

        HealthTrackerHandle { shutdown_tx, join }
    }
}

/// Handle owning the background probe task
pub struct HealthTrackerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HealthTrackerHandle {
    /// Stop the probe loop and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointRole;
    use crate::test_support::MemoryConnector;

    fn replica(name: &str) -> Endpoint {
        Endpoint {
            id: EndpointId::new(name),
            host: "localhost".to_string(),
            port: 5432,
            username: "app".to_string(),
            password: String::new(),
            database: "app_test".to_string(),
            role: EndpointRole::Replica,
        }
    }

    fn health_config(lag_threshold_ms: u64) -> HealthConfig {
        HealthConfig {
            probe_interval_ms: 1_000,
            probe_timeout_ms: 500,
            lag_threshold_ms,
        }
    }

    #[tokio::test]
    async fn test_lag_threshold_filters_eligible_set() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_lag("replica-a", Duration::from_millis(10));
        connector.set_lag("replica-b", Duration::from_millis(200));

        let tracker = ReplicaHealthTracker::new(
            vec![replica("replica-a"), replica("replica-b")],
            connector,
            health_config(50),
        );
        tracker.probe_all().await;

        assert_eq!(tracker.eligible_replicas(), vec![EndpointId::new("replica-a")]);
    }

    #[tokio::test]
    async fn test_unreachable_replica_is_ineligible_until_recovery() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_down("replica-a", true);

        let tracker = ReplicaHealthTracker::new(
            vec![replica("replica-a")],
            connector.clone(),
            health_config(500),
        );

        tracker.probe_all().await;
        assert!(tracker.eligible_replicas().is_empty());
        let status = tracker.status(&EndpointId::new("replica-a")).unwrap();
        assert!(!status.reachable);

        // Next tick after the endpoint comes back
        connector.set_down("replica-a", false);
        tracker.probe_all().await;
        assert_eq!(tracker.eligible_replicas().len(), 1);
    }

    #[tokio::test]
    async fn test_unprobed_replicas_start_ineligible() {
        let connector = Arc::new(MemoryConnector::new());
        let tracker =
            ReplicaHealthTracker::new(vec![replica("replica-a")], connector, health_config(500));
        assert!(tracker.eligible_replicas().is_empty());
    }

    #[tokio::test]
    async fn test_eligible_set_preserves_configuration_order() {
        let connector = Arc::new(MemoryConnector::new());
        let tracker = ReplicaHealthTracker::new(
            vec![replica("replica-1"), replica("replica-2"), replica("replica-3")],
            connector,
            health_config(500),
        );
        tracker.probe_all().await;

        let eligible = tracker.eligible_replicas();
        assert_eq!(
            eligible,
            vec![
                EndpointId::new("replica-1"),
                EndpointId::new("replica-2"),
                EndpointId::new("replica-3"),
            ]
        );
    }

    #[tokio::test]
    async fn test_health_summary_counts() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_lag("replica-a", Duration::from_millis(10));
        connector.set_down("replica-b", true);

        let tracker = ReplicaHealthTracker::new(
            vec![replica("replica-a"), replica("replica-b")],
            connector,
            health_config(50),
        );
        tracker.probe_all().await;

        let summary = tracker.health_summary();
        assert_eq!(summary.total_replicas, 2);
        assert_eq!(summary.eligible_replicas, 1);
        assert_eq!(summary.statuses.len(), 2);
    }

    #[tokio::test]
    async fn test_background_loop_probes_and_shuts_down() {
        let connector = Arc::new(MemoryConnector::new());
        let tracker = Arc::new(ReplicaHealthTracker::new(
            vec![replica("replica-a")],
            connector,
            HealthConfig {
                probe_interval_ms: 10,
                probe_timeout_ms: 500,
                lag_threshold_ms: 500,
            },
        ));

        let handle = Arc::clone(&tracker).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        assert_eq!(tracker.eligible_replicas().len(), 1);
    }
}
