//! Local registry bootstrap integration tests
//!
//! Runs the reconciler against the in-memory cluster:
//! - Full bootstrap and idempotent re-runs
//! - Readiness timeout
//! - Best-effort certificate steps vs required policy steps
//! - Teardown

mod common;

use common::*;
use overlock_cluster::{ClusterHandle, ObjectKey, ObjectKind};
use overlock_core::{Error, RegistryEndpoint};
use std::sync::Arc;
use std::time::Duration;

fn local_endpoint() -> RegistryEndpoint {
    RegistryEndpoint::local(&settings())
}

#[tokio::test]
async fn test_bootstrap_creates_registry_objects() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let charts = Arc::new(MockCharts::new());
    let reconciler = reconciler(cluster.clone(), charts.clone());

    assert!(reconciler.ensure_local_registry(&local_endpoint()).await.unwrap());

    let settings = settings();
    assert!(cluster.contains(&namespace_key()));
    assert!(cluster.contains(&deployment_key()));
    assert!(cluster.contains(&service_key()));
    assert_eq!(cluster.count_kind(ObjectKind::ConfigMap), 2);
    assert!(cluster.contains(&ObjectKey::cluster(
        ObjectKind::ClusterIssuer,
        &settings.certificate.issuer_name
    )));
    assert!(cluster.contains(&ObjectKey::namespaced(
        ObjectKind::Certificate,
        &settings.namespace,
        &settings.certificate.certificate_name
    )));
    assert_eq!(cluster.count_kind(ObjectKind::ClusterPolicy), 1);
    assert_eq!(charts.installs(), vec!["cert-manager", "kyverno"]);
}

#[tokio::test]
async fn test_bootstrap_is_idempotent() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let charts = Arc::new(MockCharts::new());
    let reconciler = reconciler(cluster.clone(), charts.clone());
    let endpoint = local_endpoint();

    reconciler.ensure_local_registry(&endpoint).await.unwrap();
    let first_pass = cluster.writes();

    reconciler.ensure_local_registry(&endpoint).await.unwrap();
    reconciler.ensure_local_registry(&endpoint).await.unwrap();

    assert_eq!(cluster.writes(), first_pass);
    assert_eq!(charts.installs().len(), 2);
    assert_eq!(cluster.count_kind(ObjectKind::Deployment), 1);
    assert_eq!(cluster.count_kind(ObjectKind::ClusterPolicy), 1);
}

#[tokio::test]
async fn test_policy_uses_service_node_port() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let reconciler = reconciler(cluster.clone(), Arc::new(MockCharts::new()));
    let endpoint = local_endpoint();

    reconciler.ensure_local_registry(&endpoint).await.unwrap();

    let policy = cluster
        .object(&ObjectKey::cluster(
            ObjectKind::ClusterPolicy,
            "overlock-registry-registry-pull",
        ))
        .expect("registry policy stored");
    let json = serde_json::to_string(&policy).unwrap();
    assert!(json.contains(&format!("{}/", endpoint.server_address)));
    assert!(json.contains("localhost:30100/"));
}

#[tokio::test(start_paused = true)]
async fn test_readiness_times_out() {
    let cluster = Arc::new(MockCluster::new());
    let charts = Arc::new(MockCharts::new());
    let reconciler = reconciler(cluster.clone(), charts.clone());

    let started = tokio::time::Instant::now();
    let err = reconciler
        .ensure_local_registry(&local_endpoint())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_not_ready(), "unexpected error: {err}");
    assert!(elapsed >= Duration::from_secs(29), "gave up after {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(31), "gave up after {elapsed:?}");

    // Nothing after readiness ran
    assert_eq!(cluster.count_kind(ObjectKind::ClusterPolicy), 0);
    assert_eq!(charts.installs(), vec!["cert-manager"]);
}

#[tokio::test(start_paused = true)]
async fn test_readiness_waits_for_replica() {
    let cluster = Arc::new(MockCluster::new());
    let reconciler = reconciler(cluster.clone(), Arc::new(MockCharts::new()));

    let flip = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cluster.set_ready(true);
        })
    };

    let started = tokio::time::Instant::now();
    reconciler
        .ensure_local_registry(&local_endpoint())
        .await
        .unwrap();
    flip.await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(30));
}

#[tokio::test]
async fn test_cert_manager_failure_is_not_fatal() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let charts = Arc::new(MockCharts::new());
    charts.fail("cert-manager");
    let reconciler = reconciler(cluster.clone(), charts.clone());

    assert!(reconciler.ensure_local_registry(&local_endpoint()).await.unwrap());

    // The issuer is skipped, everything else is in place
    assert_eq!(cluster.count_kind(ObjectKind::ClusterIssuer), 0);
    assert!(cluster.contains(&deployment_key()));
    assert_eq!(cluster.count_kind(ObjectKind::ClusterPolicy), 1);
    assert_eq!(charts.installs(), vec!["kyverno"]);
}

#[tokio::test]
async fn test_policy_controller_failure_is_fatal() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let charts = Arc::new(MockCharts::new());
    charts.fail("kyverno");
    let reconciler = reconciler(cluster.clone(), charts.clone());

    let err = reconciler
        .ensure_local_registry(&local_endpoint())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Chart { ref release, .. } if release == "kyverno"));
    assert!(cluster.contains(&deployment_key()));
    assert_eq!(cluster.count_kind(ObjectKind::ClusterPolicy), 0);
}

#[tokio::test]
async fn test_existing_namespace_is_left_alone() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let settings = settings();
    cluster
        .create(&overlock_cluster::objects::namespace(&settings))
        .await
        .unwrap();
    let before = cluster.writes().len();

    let reconciler = reconciler(cluster.clone(), Arc::new(MockCharts::new()));
    reconciler
        .ensure_local_registry(&local_endpoint())
        .await
        .unwrap();

    let writes = cluster.writes();
    assert!(!writes[before..]
        .iter()
        .any(|w| w.starts_with("create namespace")));
}

#[tokio::test]
async fn test_is_local_registry() {
    let empty = reconciler(Arc::new(MockCluster::new()), Arc::new(MockCharts::new()));
    assert!(!empty.is_local_registry().await.unwrap());

    let running = reconciler(
        Arc::new(cluster_with_registry_pod()),
        Arc::new(MockCharts::new()),
    );
    assert!(running.is_local_registry().await.unwrap());
}

#[tokio::test]
async fn test_delete_removes_service_and_deployment() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_ready(true);
    let reconciler = reconciler(cluster.clone(), Arc::new(MockCharts::new()));
    reconciler
        .ensure_local_registry(&local_endpoint())
        .await
        .unwrap();

    reconciler.delete_local_registry().await.unwrap();

    assert!(!cluster.contains(&service_key()));
    assert!(!cluster.contains(&deployment_key()));
    assert!(cluster.contains(&namespace_key()));
    assert_eq!(cluster.count_kind(ObjectKind::ConfigMap), 2);

    let writes = cluster.writes();
    let deletes: Vec<_> = writes.iter().filter(|w| w.starts_with("delete")).collect();
    assert_eq!(
        deletes,
        vec![
            "delete service overlock/registry",
            "delete deployment overlock/overlock-registry"
        ]
    );
}

#[tokio::test]
async fn test_delete_tolerates_missing_objects() {
    let cluster = Arc::new(MockCluster::new());
    let reconciler = reconciler(cluster.clone(), Arc::new(MockCharts::new()));

    reconciler.delete_local_registry().await.unwrap();
    assert!(cluster.writes().is_empty());
}
