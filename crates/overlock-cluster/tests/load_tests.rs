//! Image load integration tests
//!
//! Loads archives into the local registry through the tunnel, with and
//! without version upgrades, and into a remote registry directly.

mod common;

use common::*;
use overlock_cluster::{load_remote, LoadRequest};
use overlock_core::{Credentials, Error, RegistryEndpoint};
use overlock_image::ImageProfile;
use std::path::Path;
use std::sync::Arc;

fn request(archive: &Path, image: &str, upgrade: bool) -> LoadRequest {
    LoadRequest {
        archive: archive.to_path_buf(),
        image: image.to_string(),
        upgrade,
        profile: ImageProfile::Generic,
    }
}

fn tunnel_port(target: &str) -> u16 {
    let rest = target
        .strip_prefix("localhost:")
        .unwrap_or_else(|| panic!("not a tunnel target: {target}"));
    let (port, _) = rest.split_once('/').unwrap();
    port.parse().unwrap()
}

#[tokio::test]
async fn test_load_into_running_local_registry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let cluster = Arc::new(cluster_with_registry_pod());
    let charts = Arc::new(MockCharts::new());
    let registry = Arc::new(MockRegistry::new());
    let loader = loader(cluster.clone(), charts.clone(), registry.clone());

    let loaded = loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:1.0", false),
        )
        .await
        .unwrap();

    assert_eq!(loaded, "my-image:1.0");

    let pushes = registry.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].target.ends_with("/my-image:1.0"));
    assert!(tunnel_port(&pushes[0].target) > 0);
    assert!(!pushes[0].authenticated);
    assert_eq!(pushes[0].layers, 1);

    // The registry was already there
    assert!(cluster.writes().is_empty());
    assert!(charts.installs().is_empty());
}

#[tokio::test]
async fn test_load_with_upgrade_publishes_next_patch() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let cluster = Arc::new(cluster_with_registry_pod());
    let registry = Arc::new(MockRegistry::new().with_tags("my-image", &["1.0.0", "1.0.3", "2.0.0"]));
    let loader = loader(cluster.clone(), Arc::new(MockCharts::new()), registry.clone());

    let loaded = loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:1.0", true),
        )
        .await
        .unwrap();

    assert_eq!(loaded, "my-image:1.0.4");
    let pushes = registry.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].target.ends_with("/my-image:1.0.4"));

    // One tunnel to list, one to push
    assert_eq!(cluster.dial_count(), 2);
}

#[tokio::test]
async fn test_upgrade_without_tags_starts_at_patch_zero() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let registry = Arc::new(MockRegistry::new());
    registry.fail_list();
    let loader = loader(
        Arc::new(cluster_with_registry_pod()),
        Arc::new(MockCharts::new()),
        registry.clone(),
    );

    let loaded = loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:2.1.7", true),
        )
        .await
        .unwrap();

    assert_eq!(loaded, "my-image:2.1.0");
}

#[tokio::test]
async fn test_invalid_version_fails_before_push() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let cluster = Arc::new(cluster_with_registry_pod());
    let registry = Arc::new(MockRegistry::new());
    let loader = loader(cluster.clone(), Arc::new(MockCharts::new()), registry.clone());

    let err = loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:latest", true),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidVersion { .. }), "unexpected: {err}");
    assert!(registry.pushes().is_empty());
    assert_eq!(cluster.dial_count(), 0);
}

#[tokio::test]
async fn test_load_bootstraps_missing_registry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let cluster = Arc::new(MockCluster::new().with_scheduler());
    cluster.set_ready(true);
    let charts = Arc::new(MockCharts::new());
    let registry = Arc::new(MockRegistry::new());
    let loader = loader(cluster.clone(), charts.clone(), registry.clone());

    loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:1.0", false),
        )
        .await
        .unwrap();

    assert!(cluster.contains(&deployment_key()));
    assert!(cluster.contains(&service_key()));
    assert_eq!(charts.installs(), vec!["cert-manager", "kyverno"]);
    assert_eq!(registry.pushes().len(), 1);
}

#[tokio::test]
async fn test_load_fails_on_bad_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("empty.tar");
    std::fs::write(&archive, b"").unwrap();
    let registry = Arc::new(MockRegistry::new());
    let loader = loader(
        Arc::new(cluster_with_registry_pod()),
        Arc::new(MockCharts::new()),
        registry.clone(),
    );

    let err = loader
        .load(
            &RegistryEndpoint::local(&settings()),
            &request(&archive, "my-image:1.0", false),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoLayers { .. }), "unexpected: {err}");
    assert!(registry.pushes().is_empty());
}

#[tokio::test]
async fn test_load_into_remote_registry() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let cluster = Arc::new(MockCluster::new());
    let registry = Arc::new(MockRegistry::new().with_tags("team/app", &["0.4.1"]));
    let loader = loader(cluster.clone(), Arc::new(MockCharts::new()), registry.clone());

    let endpoint = RegistryEndpoint::remote("acme", "registry.example.com")
        .with_credentials(Credentials::new("robot", "s3cret"));

    let loaded = loader
        .load(&endpoint, &request(&archive, "team/app:0.4", true))
        .await
        .unwrap();

    assert_eq!(loaded, "registry.example.com/team/app:0.4.2");
    let pushes = registry.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].authenticated);

    // Remote loads never touch the cluster
    assert_eq!(cluster.dial_count(), 0);
    assert!(cluster.writes().is_empty());
}

#[tokio::test]
async fn test_remote_endpoint_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let registry = Arc::new(MockRegistry::new());
    let loader = loader(
        Arc::new(MockCluster::new()),
        Arc::new(MockCharts::new()),
        registry.clone(),
    );

    let err = loader
        .load(
            &RegistryEndpoint::remote("acme", ""),
            &request(&archive, "app:1.0", false),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert!(registry.pushes().is_empty());
}

#[tokio::test]
async fn test_remote_load_needs_no_cluster() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let registry = MockRegistry::new().with_tags("team/app", &["0.4.1", "0.4.6"]);
    let endpoint = RegistryEndpoint::remote("acme", "registry.example.com");

    let loaded = load_remote(&registry, &endpoint, &request(&archive, "team/app:0.4", true))
        .await
        .unwrap();

    assert_eq!(loaded, "registry.example.com/team/app:0.4.7");
    let pushes = registry.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(!pushes[0].authenticated);
}

#[tokio::test]
async fn test_remote_load_rejects_local_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let archive = write_archive(dir.path());
    let registry = MockRegistry::new();

    let err = load_remote(
        &registry,
        &RegistryEndpoint::local(&settings()),
        &request(&archive, "my-image:1.0", false),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::InvalidConfig { .. }), "unexpected: {err}");
    assert!(registry.pushes().is_empty());
}
