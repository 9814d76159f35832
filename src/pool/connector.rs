//! Backend collaborator seam.
//!
//! The router does not speak any wire protocol itself. It dials and talks to
//! databases through these object-safe traits, so the same routing core runs
//! against the PostgreSQL backend in production and in-memory doubles in
//! tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::BackendError;

/// Result of executing one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
}

/// One live connection to an endpoint.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement. The statement format is the backend's concern.
    async fn execute(&mut self, statement: &str) -> Result<ExecuteOutcome, BackendError>;

    /// Lightweight status query reporting the endpoint's replication lag.
    /// A primary (or a replica that has fully replayed) reports zero.
    async fn probe(&mut self) -> Result<Duration, BackendError>;

    /// Whether the connection is still usable. Broken connections are
    /// discarded by the pool instead of being handed out again.
    fn is_open(&self) -> bool;

    /// Gracefully close the connection.
    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}

/// Dials new connections to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, BackendError>;
}
