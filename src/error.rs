//! # Structured Error Handling
//!
//! Central error taxonomy for routing, pooling, and health operations.
//! Replica-side read failures are recoverable and handled internally by the
//! router; primary-side write failures are always surfaced to the caller.

use crate::endpoint::EndpointId;

/// Opaque failure reported by a backend collaborator (connector, connection).
///
/// Backends differ in their native error types, so the seam carries a single
/// boxed error with full context preserved for logging and downcasting.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct BackendError(#[from] anyhow::Error);

impl BackendError {
    pub fn msg(message: impl Into<String>) -> Self {
        BackendError(anyhow::anyhow!(message.into()))
    }
}

/// Error types for routing and execution operations
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No pooled connection became available within the acquire timeout.
    /// Retryable by the caller after backoff.
    #[error("connection pool for {endpoint} exhausted after waiting {waited_ms}ms")]
    PoolExhausted { endpoint: EndpointId, waited_ms: u64 },

    /// The endpoint refused or dropped the connection attempt. Reads are
    /// retried against another eligible endpoint; writes surface this
    /// unchanged since the primary has no safe substitute.
    #[error("endpoint {endpoint} is unreachable: {source}")]
    EndpointUnreachable {
        endpoint: EndpointId,
        source: BackendError,
    },

    /// A routing hint named an endpoint that is neither the primary nor an
    /// eligible replica. Recovered locally with a primary fallback and a
    /// warning log; never returned from `Router::execute`.
    #[error("routing hint '{hint}' is neither the primary nor an eligible replica")]
    RoutingHintUnsatisfiable { hint: EndpointId },

    /// Statement execution failed after a connection was established.
    #[error("statement execution failed on {endpoint}: {source}")]
    Execution {
        endpoint: EndpointId,
        source: BackendError,
    },

    /// Acquire attempted against a pool that has been shut down.
    #[error("connection pool for {endpoint} is closed")]
    PoolClosed { endpoint: EndpointId },

    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigurationError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
