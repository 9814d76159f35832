//! PostgreSQL backend.
//!
//! Dials plain `sqlx` connections; pooling and routing stay in this crate.
//! The probe asks the replica how far behind replay is, so eligibility is
//! based on replication lag as the replica itself reports it.

use async_trait::async_trait;
use sqlx::{Connection as _, PgConnection};
use std::time::Duration;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::BackendError;
use crate::pool::{Connection, Connector, ExecuteOutcome};

/// Reported replay delay in seconds. NULL when the server is not a standby
/// or has not replayed any WAL yet, which both read as "not lagging".
const LAG_QUERY: &str =
    "SELECT EXTRACT(EPOCH FROM (now() - pg_last_xact_replay_timestamp()))::float8";

/// Dials PostgreSQL endpoints
#[derive(Debug, Clone, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        PgConnector
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, BackendError> {
        let connection = PgConnection::connect(&endpoint.connection_url())
            .await
            .map_err(|e| BackendError::from(anyhow::Error::new(e)))?;

        debug!(endpoint = %endpoint.id, host = %endpoint.host, "PostgreSQL connection established");

        Ok(Box::new(PgClientConnection {
            connection,
            open: true,
        }))
    }
}

struct PgClientConnection {
    connection: PgConnection,
    open: bool,
}

impl PgClientConnection {
    /// Connection-level failures poison the connection; statement-level
    /// database errors leave it reusable.
    fn record_error(&mut self, error: &sqlx::Error) {
        if !matches!(error, sqlx::Error::Database(_)) {
            self.open = false;
        }
    }
}

#[async_trait]
impl Connection for PgClientConnection {
    async fn execute(&mut self, statement: &str) -> Result<ExecuteOutcome, BackendError> {
        match sqlx::query(statement).execute(&mut self.connection).await {
            Ok(result) => Ok(ExecuteOutcome {
                rows_affected: result.rows_affected(),
            }),
            Err(error) => {
                self.record_error(&error);
                Err(BackendError::from(anyhow::Error::new(error)))
            }
        }
    }

    async fn probe(&mut self) -> Result<Duration, BackendError> {
        match sqlx::query_scalar::<_, Option<f64>>(LAG_QUERY)
            .fetch_one(&mut self.connection)
            .await
        {
            Ok(lag_seconds) => Ok(lag_seconds
                .map(|seconds| Duration::from_secs_f64(seconds.max(0.0)))
                .unwrap_or(Duration::ZERO)),
            Err(error) => {
                self.record_error(&error);
                Err(BackendError::from(anyhow::Error::new(error)))
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.connection
            .close()
            .await
            .map_err(|e| BackendError::from(anyhow::Error::new(e)))
    }
}
