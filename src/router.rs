//! # Router Facade
//!
//! Single entry point for the data-access layer. Constructed once from
//! configuration with an injected backend connector and passed by handle to
//! all callers; there is no process-global router.
//!
//! ## Data flow
//!
//! `execute` routes the operation (session guard, then policy over the live
//! replica snapshot), checks a connection out of the chosen endpoint's pool,
//! runs the statement, and for writes stamps the session watermark.
//!
//! ## Failure policy
//!
//! Replica-side read failures are absorbed: the read is retried on the next
//! eligible replica and finally on the primary, so reads degrade to
//! primary-only service rather than failing. Primary-side failures are
//! surfaced unchanged; substituting another endpoint for the primary would
//! break write correctness.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::endpoint::{EndpointId, OperationDescriptor, OperationKind, SessionId};
use crate::error::{Result, RouterError};
use crate::health::{HealthSummary, HealthTrackerHandle, ReplicaHealthTracker};
use crate::pool::{ConnectionPool, Connector, ExecuteOutcome, PoolMetrics};
use crate::routing::{RouteTarget, RoutingPolicy};
use crate::session::{SessionConsistencyGuard, SweeperHandle};

/// Primary/replica query router
pub struct Router {
    primary_pool: Arc<ConnectionPool>,
    replica_pools: HashMap<EndpointId, Arc<ConnectionPool>>,
    /// Configuration order, used for the read retry ladder
    replica_order: Vec<EndpointId>,
    tracker: Arc<ReplicaHealthTracker>,
    tracker_handle: HealthTrackerHandle,
    guard: Arc<SessionConsistencyGuard>,
    sweeper_handle: SweeperHandle,
}

impl Router {
    /// Build pools, start the health probe loop and watermark sweeper, and
    /// return the ready router.
    pub async fn new(config: RouterConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let primary = config.primary_endpoint();
        let primary_id = primary.id.clone();
        let primary_pool = Arc::new(ConnectionPool::new(
            primary,
            Arc::clone(&connector),
            config.pool.clone(),
        ));

        let replicas = config.replica_endpoints();
        let replica_order: Vec<EndpointId> = replicas.iter().map(|r| r.id.clone()).collect();
        let replica_pools: HashMap<EndpointId, Arc<ConnectionPool>> = replicas
            .iter()
            .map(|replica| {
                (
                    replica.id.clone(),
                    Arc::new(ConnectionPool::new(
                        replica.clone(),
                        Arc::clone(&connector),
                        config.pool.clone(),
                    )),
                )
            })
            .collect();

        let tracker = Arc::new(ReplicaHealthTracker::new(
            replicas,
            Arc::clone(&connector),
            config.health.clone(),
        ));
        let tracker_handle = Arc::clone(&tracker).start();

        let policy = Arc::new(RoutingPolicy::new(primary_id.clone(), config.load_balancing));
        let guard = Arc::new(SessionConsistencyGuard::new(
            policy,
            config.session.consistency_window(),
        ));
        let sweeper_handle = guard.start_sweeper(config.session.sweep_interval());

        info!(
            primary = %primary_id,
            replicas = replica_order.len(),
            strategy = ?config.load_balancing,
            "🚦 Query router initialized"
        );

        Ok(Self {
            primary_pool,
            replica_pools,
            replica_order,
            tracker,
            tracker_handle,
            guard,
            sweeper_handle,
        })
    }

    /// Open a logical session for consistency tracking.
    pub fn begin_session(&self) -> SessionId {
        let session_id = SessionId::new();
        debug!(session_id = %session_id, "Session opened");
        session_id
    }

    /// Close a logical session and drop its watermark.
    pub fn end_session(&self, session_id: SessionId) {
        self.guard.end_session(&session_id);
        debug!(session_id = %session_id, "Session closed");
    }

    /// Route and execute one operation.
    pub async fn execute(
        &self,
        operation: &OperationDescriptor,
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        match operation.kind {
            OperationKind::Write => self.execute_write(operation, statement).await,
            OperationKind::Read => self.execute_read(operation, statement).await,
        }
    }

    async fn execute_write(
        &self,
        operation: &OperationDescriptor,
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        // Primary failures surface to the caller unchanged
        let outcome = self.run_on(&self.primary_pool, statement).await?;
        if let Some(session_id) = operation.session_id {
            self.guard.record_write(session_id);
        }
        Ok(outcome)
    }

    async fn execute_read(
        &self,
        operation: &OperationDescriptor,
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        let eligible = self.tracker.eligible_replicas();
        match self.guard.route_read(operation, &eligible) {
            RouteTarget::Primary => self.run_on(&self.primary_pool, statement).await,
            RouteTarget::Replica(replica_id) => {
                match self.run_on_replica(&replica_id, statement).await {
                    Ok(outcome) => Ok(outcome),
                    Err(error) => {
                        warn!(
                            endpoint = %replica_id,
                            error = %error,
                            "Read failed on replica, retrying elsewhere"
                        );
                        self.retry_read(&replica_id, &eligible, statement).await
                    }
                }
            }
        }
    }

    /// Retry ladder for replica-side read failures: every other eligible
    /// replica in order, then the primary.
    async fn retry_read(
        &self,
        failed: &EndpointId,
        eligible: &[EndpointId],
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        for replica_id in eligible.iter().filter(|id| *id != failed) {
            match self.run_on_replica(replica_id, statement).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    warn!(
                        endpoint = %replica_id,
                        error = %error,
                        "Read retry failed on replica, continuing"
                    );
                }
            }
        }
        self.run_on(&self.primary_pool, statement).await
    }

    async fn run_on_replica(
        &self,
        replica_id: &EndpointId,
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        let pool = self.replica_pools.get(replica_id).ok_or_else(|| {
            RouterError::EndpointUnreachable {
                endpoint: replica_id.clone(),
                source: crate::error::BackendError::msg("no pool configured for endpoint"),
            }
        })?;
        self.run_on(pool, statement).await
    }

    async fn run_on(
        &self,
        pool: &Arc<ConnectionPool>,
        statement: &str,
    ) -> Result<ExecuteOutcome> {
        let mut connection = pool.acquire().await?;
        connection
            .execute(statement)
            .await
            .map_err(|source| RouterError::Execution {
                endpoint: pool.endpoint_id().clone(),
                source,
            })
    }

    /// Run one probe cycle immediately instead of waiting for the next tick.
    pub async fn refresh_health(&self) {
        self.tracker.probe_all().await;
    }

    /// Operator view of replica health
    pub fn health_summary(&self) -> HealthSummary {
        self.tracker.health_summary()
    }

    /// Pool statistics for every endpoint, primary first
    pub fn pool_metrics(&self) -> Vec<PoolMetrics> {
        let mut metrics = vec![self.primary_pool.metrics()];
        for replica_id in &self.replica_order {
            if let Some(pool) = self.replica_pools.get(replica_id) {
                metrics.push(pool.metrics());
            }
        }
        metrics
    }

    /// Sessions currently pinned by a consistency watermark
    pub fn tracked_sessions(&self) -> usize {
        self.guard.tracked_sessions()
    }

    /// Stop background tasks and close every pool.
    pub async fn shutdown(self) {
        self.tracker_handle.shutdown().await;
        self.sweeper_handle.shutdown().await;
        self.primary_pool.close().await;
        for pool in self.replica_pools.values() {
            pool.close().await;
        }
        info!("Query router shut down");
    }
}
