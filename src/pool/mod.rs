//! # Connection Pooling
//!
//! Bounded, reusable connections to a single endpoint.
//!
//! ## Overview
//!
//! Each configured endpoint gets its own [`ConnectionPool`]. Connections are
//! dialed lazily up to `max_connections` and reused through an idle list.
//! Callers past the limit wait on a semaphore, bounded by the configured
//! acquire timeout. Acquisition is the only blocking operation in the router
//! and is safe to cancel: a dropped acquire wait releases nothing it did not
//! take, so permits cannot leak.
//!
//! Release is scoped: [`PooledConnection`] returns its connection to the
//! pool when dropped, on every exit path including statement failure.

pub mod connector;

pub use connector::{Connection, Connector, ExecuteOutcome};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PoolSettings;
use crate::endpoint::{Endpoint, EndpointId};
use crate::error::{BackendError, Result, RouterError};

/// Bounded set of reusable connections to one endpoint
pub struct ConnectionPool {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    /// Live connections, idle plus checked out
    total_connections: AtomicU32,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        debug!(
            endpoint = %endpoint.id,
            max_connections = settings.max_connections,
            acquire_timeout_ms = settings.acquire_timeout_ms,
            "Connection pool created"
        );

        let max = settings.max_connections as usize;
        Self {
            endpoint,
            connector,
            settings,
            semaphore: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::with_capacity(max)),
            total_connections: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint.id
    }

    /// Check out a connection, waiting up to the configured acquire timeout
    /// for capacity. Dials a new connection only when no idle one is usable.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RouterError::PoolClosed {
                endpoint: self.endpoint.id.clone(),
            });
        }

        let permit = match timeout(
            self.settings.acquire_timeout(),
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            // Semaphore closed: pool shut down while we were waiting
            Ok(Err(_)) => {
                return Err(RouterError::PoolClosed {
                    endpoint: self.endpoint.id.clone(),
                })
            }
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint.id,
                    waited_ms = self.settings.acquire_timeout_ms,
                    "Pool exhausted, acquire timed out"
                );
                return Err(RouterError::PoolExhausted {
                    endpoint: self.endpoint.id.clone(),
                    waited_ms: self.settings.acquire_timeout_ms,
                });
            }
        };

        let connection = loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(conn) if conn.is_open() => break conn,
                Some(_dead) => {
                    // Dropped; dial a replacement on the next loop turn
                    self.total_connections.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    let conn = self
                        .connector
                        .connect(&self.endpoint)
                        .await
                        .map_err(|source| RouterError::EndpointUnreachable {
                            endpoint: self.endpoint.id.clone(),
                            source,
                        })?;
                    self.total_connections.fetch_add(1, Ordering::AcqRel);
                    break conn;
                }
            }
        };

        Ok(PooledConnection {
            connection: Some(connection),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Return a connection to the idle list, or drop it if it broke or the
    /// pool shut down while it was checked out.
    fn release(&self, connection: Box<dyn Connection>) {
        if self.closed.load(Ordering::Acquire) || !connection.is_open() {
            self.total_connections.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        self.idle.lock().push(connection);
    }

    /// Current pool statistics snapshot
    pub fn metrics(&self) -> PoolMetrics {
        let idle = self.idle.lock().len() as u32;
        let size = self.total_connections.load(Ordering::Acquire);
        PoolMetrics {
            endpoint: self.endpoint.id.clone(),
            size,
            idle,
            in_flight: size.saturating_sub(idle),
            max_connections: self.settings.max_connections,
            is_closed: self.closed.load(Ordering::Acquire),
        }
    }

    /// Shut the pool down: reject new acquires, wake waiters, and close all
    /// idle connections. Checked-out connections are dropped when returned.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();

        let drained: Vec<Box<dyn Connection>> = self.idle.lock().drain(..).collect();
        for connection in drained {
            self.total_connections.fetch_sub(1, Ordering::AcqRel);
            if let Err(error) = connection.close().await {
                debug!(
                    endpoint = %self.endpoint.id,
                    error = %error,
                    "Connection reported an error while closing"
                );
            }
        }

        info!(endpoint = %self.endpoint.id, "Connection pool closed");
    }
}

/// Scoped checkout of a pooled connection. Returns the connection to the
/// pool on drop, on every exit path.
pub struct PooledConnection {
    connection: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn execute(&mut self, statement: &str) -> std::result::Result<ExecuteOutcome, BackendError> {
        match self.connection.as_mut() {
            Some(conn) => conn.execute(statement).await,
            None => Err(BackendError::msg("connection already returned to pool")),
        }
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        &self.pool.endpoint.id
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub endpoint: EndpointId,
    pub size: u32,
    pub idle: u32,
    pub in_flight: u32,
    pub max_connections: u32,
    pub is_closed: bool,
}

impl PoolMetrics {
    /// Checked-out share of maximum capacity
    pub fn utilization_percentage(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            (self.in_flight as f64 / self.max_connections as f64) * 100.0
        }
    }
}
