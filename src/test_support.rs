//! In-memory backend doubles for exercising the router without a live
//! database.
//!
//! [`MemoryConnector`] implements the backend seam with scriptable lag,
//! reachability, and failure injection per endpoint, and records which
//! endpoint served every statement so tests can assert routing decisions.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::{Endpoint, EndpointId};
use crate::error::BackendError;
use crate::pool::{Connection, Connector, ExecuteOutcome};

#[derive(Default)]
struct MemoryState {
    lag: DashMap<String, Duration>,
    down: DashMap<String, bool>,
    failing_statements: DashMap<String, bool>,
    break_epoch: DashMap<String, usize>,
    connect_count: AtomicUsize,
    live_connections: AtomicUsize,
    executed: Mutex<Vec<(EndpointId, String)>>,
}

impl MemoryState {
    fn is_down(&self, endpoint: &str) -> bool {
        self.down.get(endpoint).map(|d| *d).unwrap_or(false)
    }

    fn epoch(&self, endpoint: &str) -> usize {
        self.break_epoch.get(endpoint).map(|e| *e).unwrap_or(0)
    }
}

/// Scriptable in-memory connector shared across pools and the health tracker
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replication lag the endpoint reports on probe
    pub fn set_lag(&self, endpoint: &str, lag: Duration) {
        self.state.lag.insert(endpoint.to_string(), lag);
    }

    /// Make the endpoint refuse (or accept) new connections
    pub fn set_down(&self, endpoint: &str, down: bool) {
        self.state.down.insert(endpoint.to_string(), down);
    }

    /// Make statement execution fail on the endpoint without affecting dials
    pub fn fail_statements(&self, endpoint: &str, failing: bool) {
        self.state
            .failing_statements
            .insert(endpoint.to_string(), failing);
    }

    /// Mark every currently open connection to the endpoint as broken.
    /// Connections dialed afterwards are healthy.
    pub fn break_open_connections(&self, endpoint: &str) {
        *self
            .state
            .break_epoch
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    /// Total successful dials across all endpoints
    pub fn connect_count(&self) -> usize {
        self.state.connect_count.load(Ordering::Acquire)
    }

    /// Connections currently alive (dialed and not yet dropped)
    pub fn live_connections(&self) -> usize {
        self.state.live_connections.load(Ordering::Acquire)
    }

    /// Every executed statement with the endpoint that served it
    pub fn executed(&self) -> Vec<(EndpointId, String)> {
        self.state.executed.lock().clone()
    }

    /// Statements served by one endpoint, in execution order
    pub fn executed_on(&self, endpoint: &str) -> Vec<String> {
        self.state
            .executed
            .lock()
            .iter()
            .filter(|(id, _)| id.as_str() == endpoint)
            .map(|(_, statement)| statement.clone())
            .collect()
    }

    pub fn clear_executed(&self) {
        self.state.executed.lock().clear();
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, BackendError> {
        if self.state.is_down(endpoint.id.as_str()) {
            return Err(BackendError::msg(format!(
                "{}: connection refused",
                endpoint.id
            )));
        }
        self.state.connect_count.fetch_add(1, Ordering::AcqRel);
        self.state.live_connections.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.id.clone(),
            epoch: self.state.epoch(endpoint.id.as_str()),
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    endpoint: EndpointId,
    epoch: usize,
    state: Arc<MemoryState>,
    closed: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &str) -> Result<ExecuteOutcome, BackendError> {
        if self
            .state
            .failing_statements
            .get(self.endpoint.as_str())
            .map(|f| *f)
            .unwrap_or(false)
        {
            return Err(BackendError::msg(format!(
                "{}: statement rejected",
                self.endpoint
            )));
        }
        self.state
            .executed
            .lock()
            .push((self.endpoint.clone(), statement.to_string()));
        Ok(ExecuteOutcome { rows_affected: 1 })
    }

    async fn probe(&mut self) -> Result<Duration, BackendError> {
        if self.state.is_down(self.endpoint.as_str()) {
            return Err(BackendError::msg(format!(
                "{}: connection lost",
                self.endpoint
            )));
        }
        Ok(self
            .state
            .lag
            .get(self.endpoint.as_str())
            .map(|lag| *lag)
            .unwrap_or(Duration::ZERO))
    }

    fn is_open(&self) -> bool {
        !self.closed && self.epoch == self.state.epoch(self.endpoint.as_str())
    }

    async fn close(mut self: Box<Self>) -> Result<(), BackendError> {
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.state.live_connections.fetch_sub(1, Ordering::AcqRel);
    }
}
