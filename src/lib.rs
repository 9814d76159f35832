#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Router Core
//!
//! Primary/replica query router for applications that split reads and writes
//! across a replicated database fleet.
//!
//! ## Overview
//!
//! The router sits between a data-access layer and a set of database
//! endpoints. Every operation is routed per call: writes always go to the
//! primary, reads go to a healthy replica when one is available, and a
//! session that just wrote is pinned to the primary for a configurable
//! consistency window so it can never read its own write stale
//! (read-your-writes).
//!
//! Replication itself is the database fleet's job; this crate only decides
//! where each operation is sent.
//!
//! ## Architecture
//!
//! - [`pool`] - Bounded connection pools, one per endpoint, with timed and
//!   cancel-safe acquisition
//! - [`health`] - Periodic replica probing for reachability and replication
//!   lag, published as non-blocking snapshots
//! - [`routing`] - The pure routing decision with pluggable load balancing
//! - [`session`] - Per-session write watermarks enforcing the consistency
//!   window
//! - [`router`] - The facade composing all of the above behind one
//!   `execute` call
//! - [`backend`] - PostgreSQL implementation of the connector seam
//! - [`config`] - YAML configuration with environment overlays
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use router_core::backend::PgConnector;
//! use router_core::config::ConfigManager;
//! use router_core::{OperationDescriptor, Router};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let router = Router::new(manager.config().clone(), Arc::new(PgConnector::new())).await?;
//!
//! let session = router.begin_session();
//!
//! let write = OperationDescriptor::write().for_session(session);
//! router.execute(&write, "INSERT INTO orders (sku) VALUES ('a-1')").await?;
//!
//! // Routed to the primary while the consistency window is open
//! let read = OperationDescriptor::read().for_session(session);
//! router.execute(&read, "SELECT count(*) FROM orders").await?;
//!
//! router.end_session(session);
//! router.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Behavior
//!
//! Reads degrade gracefully: an unhealthy or lagging replica set routes
//! reads to the primary, and a replica that fails mid-read is retried on
//! the next eligible replica and finally the primary. Writes fail fast and
//! visibly when the primary is unreachable; no endpoint is ever substituted
//! for the primary.

pub mod backend;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod logging;
pub mod pool;
pub mod router;
pub mod routing;
pub mod session;
pub mod test_support;

pub use config::{ConfigManager, LoadBalancingStrategy, RouterConfig};
pub use endpoint::{
    Endpoint, EndpointId, EndpointRole, OperationDescriptor, OperationKind, SessionId,
};
pub use error::{BackendError, Result, RouterError};
pub use health::{HealthSummary, ReplicaHealthTracker, ReplicaStatus};
pub use pool::{ConnectionPool, Connector, ExecuteOutcome, PoolMetrics};
pub use router::Router;
pub use routing::{LoadBalancer, RouteTarget, RoutingPolicy};
pub use session::SessionConsistencyGuard;
