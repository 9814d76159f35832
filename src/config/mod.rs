//! # Router Configuration System
//!
//! YAML-backed configuration for the query router: endpoint topology, pool
//! sizing, health probing, and session consistency settings. Loading is
//! environment-aware (a base file plus optional per-environment overrides)
//! and validation is explicit, with no silent fallbacks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use router_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let pool_size = manager.config().pool.max_connections;
//! let window = manager.config().session.consistency_window();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::endpoint::{Endpoint, EndpointId, EndpointRole};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring router-config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// The single endpoint accepting writes
    pub primary: EndpointConfig,

    /// Read-only endpoints mirroring the primary
    #[serde(default)]
    pub replicas: Vec<EndpointConfig>,

    /// Connection pool sizing and acquire behavior (applies per endpoint)
    #[serde(default)]
    pub pool: PoolSettings,

    /// Replica health probing and lag eligibility
    #[serde(default)]
    pub health: HealthConfig,

    /// Read-your-writes consistency window tracking
    #[serde(default)]
    pub session: SessionConfig,

    /// Tie-break strategy for selecting among eligible replicas
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
}

/// Connection details for one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Stable name used in logs, hints, and metrics (e.g. "replica-1")
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_port() -> u16 {
    5432
}

impl EndpointConfig {
    /// Materialize the immutable endpoint record for the given role.
    pub fn endpoint(&self, role: EndpointRole) -> Endpoint {
        Endpoint {
            id: EndpointId::new(self.name.clone()),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            role,
        }
    }
}

/// Per-endpoint connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Replica health probing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How often the background probe cycle runs
    pub probe_interval_ms: u64,
    /// Upper bound on a single probe (dial plus status query)
    pub probe_timeout_ms: u64,
    /// Replicas lagging beyond this are ineligible for reads
    pub lag_threshold_ms: u64,
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn lag_threshold(&self) -> Duration {
        Duration::from_millis(self.lag_threshold_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 2_000,
            probe_timeout_ms: 1_000,
            lag_threshold_ms: 500,
        }
    }
}

/// Session consistency window configuration.
///
/// The window is the fundamental consistency/throughput trade-off: zero
/// confines post-write reads to the primary only for the instant of the
/// write, while large values hold sessions on the primary longer and reduce
/// replica offload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub consistency_window_ms: u64,
    /// How often expired watermarks are swept out of memory
    pub sweep_interval_ms: u64,
}

impl SessionConfig {
    pub fn consistency_window(&self) -> Duration {
        Duration::from_millis(self.consistency_window_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            consistency_window_ms: 500,
            sweep_interval_ms: 30_000,
        }
    }
}

/// Tie-break strategy used when several replicas are eligible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Rotate through eligible replicas in configuration order
    #[default]
    RoundRobin,
    /// Uniform random pick among eligible replicas
    Random,
}

impl RouterConfig {
    /// Validate the loaded configuration before any component is built.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.max_connections",
                "0",
                "pool must allow at least one connection",
            ));
        }
        if self.pool.acquire_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "pool.acquire_timeout_ms",
                "0",
                "acquire timeout must be positive",
            ));
        }
        if self.health.probe_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "health.probe_interval_ms",
                "0",
                "probe interval must be positive",
            ));
        }
        if self.session.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "session.sweep_interval_ms",
                "0",
                "sweep interval must be positive",
            ));
        }

        let mut names: Vec<&str> = Vec::with_capacity(self.replicas.len() + 1);
        names.push(&self.primary.name);
        for replica in &self.replicas {
            names.push(&replica.name);
        }
        let mut deduped = names.clone();
        deduped.sort_unstable();
        deduped.dedup();
        if deduped.len() != names.len() {
            return Err(ConfigurationError::invalid_value(
                "replicas",
                names.join(", "),
                "endpoint names must be unique",
            ));
        }

        Ok(())
    }

    /// The primary endpoint record.
    pub fn primary_endpoint(&self) -> Endpoint {
        self.primary.endpoint(EndpointRole::Primary)
    }

    /// Replica endpoint records in configuration order.
    pub fn replica_endpoints(&self) -> Vec<Endpoint> {
        self.replicas
            .iter()
            .map(|r| r.endpoint(EndpointRole::Replica))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str) -> EndpointConfig {
        EndpointConfig {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            username: "app".to_string(),
            password: String::new(),
            database: "app_test".to_string(),
        }
    }

    fn config_with_replicas(replicas: Vec<EndpointConfig>) -> RouterConfig {
        RouterConfig {
            primary: endpoint("primary"),
            replicas,
            pool: PoolSettings::default(),
            health: HealthConfig::default(),
            session: SessionConfig::default(),
            load_balancing: LoadBalancingStrategy::default(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let config = config_with_replicas(vec![endpoint("replica-1"), endpoint("replica-2")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let config = config_with_replicas(vec![endpoint("replica-1"), endpoint("replica-1")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = config_with_replicas(vec![]);
        config.pool.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_getters() {
        let config = config_with_replicas(vec![]);
        assert_eq!(config.pool.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.health.lag_threshold(), Duration::from_millis(500));
        assert_eq!(
            config.session.consistency_window(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_strategy_deserialization() {
        let strategy: LoadBalancingStrategy = serde_yaml::from_str("round_robin").unwrap();
        assert_eq!(strategy, LoadBalancingStrategy::RoundRobin);
        let strategy: LoadBalancingStrategy = serde_yaml::from_str("random").unwrap();
        assert_eq!(strategy, LoadBalancingStrategy::Random);
    }
}
