//! End-to-end routing behavior over the in-memory backend.
//!
//! These tests drive the public `Router` surface only: begin a session,
//! execute operations, and assert which endpoint actually served each
//! statement.

use router_core::config::{
    EndpointConfig, HealthConfig, LoadBalancingStrategy, PoolSettings, RouterConfig, SessionConfig,
};
use router_core::test_support::MemoryConnector;
use router_core::{EndpointId, OperationDescriptor, Router, RouterError};
use std::sync::Arc;
use std::time::Duration;

fn endpoint_config(name: &str) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        host: "localhost".to_string(),
        port: 5432,
        username: "app".to_string(),
        password: String::new(),
        database: "app_test".to_string(),
    }
}

fn test_config(replicas: &[&str]) -> RouterConfig {
    RouterConfig {
        primary: endpoint_config("primary"),
        replicas: replicas.iter().map(|name| endpoint_config(name)).collect(),
        pool: PoolSettings {
            max_connections: 4,
            acquire_timeout_ms: 100,
        },
        health: HealthConfig {
            // Long interval so tests drive probing explicitly
            probe_interval_ms: 600_000,
            probe_timeout_ms: 500,
            lag_threshold_ms: 50,
        },
        session: SessionConfig {
            consistency_window_ms: 500,
            sweep_interval_ms: 600_000,
        },
        load_balancing: LoadBalancingStrategy::RoundRobin,
    }
}

async fn router_with(
    replicas: &[&str],
    connector: &Arc<MemoryConnector>,
) -> Router {
    let router = Router::new(test_config(replicas), connector.clone())
        .await
        .expect("router construction");
    router.refresh_health().await;
    connector.clear_executed();
    router
}

#[tokio::test]
async fn test_writes_route_to_primary_with_replicas_eligible() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    for _ in 0..4 {
        router
            .execute(&OperationDescriptor::write(), "INSERT INTO t VALUES (1)")
            .await
            .unwrap();
    }

    assert_eq!(connector.executed_on("primary").len(), 4);
    assert!(connector.executed_on("replica-1").is_empty());
    assert!(connector.executed_on("replica-2").is_empty());

    router.shutdown().await;
}

#[tokio::test]
async fn test_fresh_reads_round_robin_across_replicas() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    for _ in 0..6 {
        router
            .execute(&OperationDescriptor::read(), "SELECT 1")
            .await
            .unwrap();
    }

    // Never the primary while replicas are eligible, and evenly spread
    assert!(connector.executed_on("primary").is_empty());
    assert_eq!(connector.executed_on("replica-1").len(), 3);
    assert_eq!(connector.executed_on("replica-2").len(), 3);

    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_read_your_writes_inside_and_after_window() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    let session = router.begin_session();
    router
        .execute(
            &OperationDescriptor::write().for_session(session),
            "INSERT INTO t VALUES (1)",
        )
        .await
        .unwrap();
    connector.clear_executed();

    // Inside the 500ms window: pinned to primary
    tokio::time::advance(Duration::from_millis(100)).await;
    router
        .execute(
            &OperationDescriptor::read().for_session(session),
            "SELECT a",
        )
        .await
        .unwrap();
    assert_eq!(connector.executed_on("primary"), vec!["SELECT a"]);

    // Past the window: back to replica selection
    tokio::time::advance(Duration::from_millis(500)).await;
    router
        .execute(
            &OperationDescriptor::read().for_session(session),
            "SELECT b",
        )
        .await
        .unwrap();
    assert_eq!(connector.executed_on("primary"), vec!["SELECT a"]);
    assert_eq!(
        connector.executed_on("replica-1").len() + connector.executed_on("replica-2").len(),
        1
    );

    router.end_session(session);
    router.shutdown().await;
}

#[tokio::test]
async fn test_reads_degrade_to_primary_when_no_replica_eligible() {
    let connector = Arc::new(MemoryConnector::new());
    connector.set_lag("replica-1", Duration::from_millis(200));
    connector.set_down("replica-2", true);
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    router
        .execute(&OperationDescriptor::read(), "SELECT 1")
        .await
        .unwrap();

    assert_eq!(connector.executed_on("primary"), vec!["SELECT 1"]);

    let summary = router.health_summary();
    assert_eq!(summary.total_replicas, 2);
    assert_eq!(summary.eligible_replicas, 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_replica_failure_is_absorbed_by_retry_ladder() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    // First read targets replica-1; its statements fail, replica-2 serves it
    connector.fail_statements("replica-1", true);
    let outcome = router
        .execute(&OperationDescriptor::read(), "SELECT 1")
        .await
        .unwrap();
    assert_eq!(outcome.rows_affected, 1);
    assert_eq!(connector.executed_on("replica-2"), vec!["SELECT 1"]);
    assert!(connector.executed_on("primary").is_empty());

    // Both replicas failing: the read lands on the primary, still no error
    connector.fail_statements("replica-2", true);
    router
        .execute(&OperationDescriptor::read(), "SELECT 2")
        .await
        .unwrap();
    assert_eq!(connector.executed_on("primary"), vec!["SELECT 2"]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_primary_write_failure_is_surfaced_not_substituted() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1"], &connector).await;

    connector.set_down("primary", true);
    let result = router
        .execute(&OperationDescriptor::write(), "INSERT INTO t VALUES (1)")
        .await;

    assert!(matches!(
        result,
        Err(RouterError::EndpointUnreachable { ref endpoint, .. }) if endpoint.as_str() == "primary"
    ));
    // The write never landed anywhere else
    assert!(connector.executed().is_empty());

    // Reads keep working against the replica fleet
    router
        .execute(&OperationDescriptor::read(), "SELECT 1")
        .await
        .unwrap();
    assert_eq!(connector.executed_on("replica-1"), vec!["SELECT 1"]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_routing_hints_honored_and_recovered() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    // Hint naming an eligible replica bypasses the balancer
    let hinted = OperationDescriptor::read().with_hint(EndpointId::new("replica-2"));
    router.execute(&hinted, "SELECT 1").await.unwrap();
    assert_eq!(connector.executed_on("replica-2"), vec!["SELECT 1"]);

    // Unknown hint falls back to primary instead of erroring
    let unknown = OperationDescriptor::read().with_hint(EndpointId::new("replica-9"));
    router.execute(&unknown, "SELECT 2").await.unwrap();
    assert_eq!(connector.executed_on("primary"), vec!["SELECT 2"]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_replica_recovers_eligibility_on_next_probe() {
    let connector = Arc::new(MemoryConnector::new());
    connector.set_lag("replica-1", Duration::from_millis(200));
    let router = router_with(&["replica-1"], &connector).await;

    router
        .execute(&OperationDescriptor::read(), "SELECT 1")
        .await
        .unwrap();
    assert_eq!(connector.executed_on("primary"), vec!["SELECT 1"]);

    // Replication catches up; the next probe cycle restores offload
    connector.set_lag("replica-1", Duration::from_millis(10));
    router.refresh_health().await;

    router
        .execute(&OperationDescriptor::read(), "SELECT 2")
        .await
        .unwrap();
    assert_eq!(connector.executed_on("replica-1"), vec!["SELECT 2"]);

    router.shutdown().await;
}

#[tokio::test]
async fn test_pool_metrics_cover_every_endpoint() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router_with(&["replica-1", "replica-2"], &connector).await;

    router
        .execute(&OperationDescriptor::write(), "INSERT INTO t VALUES (1)")
        .await
        .unwrap();

    let metrics = router.pool_metrics();
    assert_eq!(metrics.len(), 3);
    assert_eq!(metrics[0].endpoint.as_str(), "primary");
    assert_eq!(metrics[0].size, 1);
    assert_eq!(metrics[0].idle, 1);

    router.shutdown().await;
}

#[tokio::test]
async fn test_router_from_loaded_configuration() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("router-config.yaml"),
        r#"
primary:
  name: primary
  host: localhost
  username: app
  database: app_test
replicas:
  - name: replica-1
    host: localhost
    username: app
    database: app_test
health:
  probe_interval_ms: 600000
  probe_timeout_ms: 500
  lag_threshold_ms: 50
"#,
    )
    .unwrap();

    let manager = router_core::config::ConfigManager::load_from_directory_with_env(
        Some(dir.path().to_path_buf()),
        "test",
    )
    .unwrap();

    let connector = Arc::new(MemoryConnector::new());
    let router = Router::new(manager.config().clone(), connector.clone())
        .await
        .unwrap();
    router.refresh_health().await;

    router
        .execute(&OperationDescriptor::read(), "SELECT 1")
        .await
        .unwrap();
    assert_eq!(connector.executed_on("replica-1"), vec!["SELECT 1"]);

    router.shutdown().await;
}
