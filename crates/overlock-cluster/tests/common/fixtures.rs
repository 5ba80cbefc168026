//! Fixtures wiring the registry components against the mocks

#![allow(dead_code)]

use super::mocks::{MockCharts, MockCluster, MockRegistry};
use overlock_cluster::{
    BootstrapReconciler, CertManager, ClusterHandle, ImageLoader, KyvernoPolicies,
    LocalRegistryTransport, ObjectKey, ObjectKind, TunnelTarget,
};
use overlock_core::RegistrySettings;
use overlock_image::RegistryProtocol;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pod the registry deployment runs in the fixtures
pub const REGISTRY_POD: &str = "overlock-registry-xyz";

/// Default settings, whose selector is `app=overlock-registry`
pub fn settings() -> RegistrySettings {
    RegistrySettings::default()
}

/// A cluster already running the registry pod
pub fn cluster_with_registry_pod() -> MockCluster {
    let settings = settings();
    MockCluster::new().with_pod(&settings.namespace, &settings.pod_selector(), REGISTRY_POD)
}

/// Reconciler over `cluster` using the real cert-manager and Kyverno
/// registrars on top of `charts`
pub fn reconciler(cluster: Arc<MockCluster>, charts: Arc<MockCharts>) -> BootstrapReconciler {
    let settings = settings();
    let handle: Arc<dyn ClusterHandle> = cluster;
    let issuer = CertManager::new(handle.clone(), charts.clone(), settings.clone());
    let policies = KyvernoPolicies::new(
        handle.clone(),
        charts,
        settings.policy_controller.clone(),
    );
    BootstrapReconciler::new(handle, Arc::new(issuer), Arc::new(policies), settings)
}

/// Loader over `cluster` pushing with `registry`
pub fn loader(
    cluster: Arc<MockCluster>,
    charts: Arc<MockCharts>,
    registry: Arc<MockRegistry>,
) -> ImageLoader {
    let protocol: Arc<dyn RegistryProtocol> = registry;
    let transport = LocalRegistryTransport::new(
        cluster.clone(),
        protocol.clone(),
        TunnelTarget::registry(&settings()),
    );
    ImageLoader::new(Arc::new(reconciler(cluster, charts)), transport, protocol)
}

/// Write a small uncompressed tar archive into `dir`
pub fn write_archive(dir: &Path) -> PathBuf {
    let path = dir.join("image.tar");
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(file);

    let content = b"FROM scratch\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, "app/Dockerfile", &content[..])
        .unwrap();
    builder.finish().unwrap();
    path
}

pub fn deployment_key() -> ObjectKey {
    let settings = settings();
    ObjectKey::namespaced(
        ObjectKind::Deployment,
        &settings.namespace,
        &settings.deployment_name,
    )
}

pub fn service_key() -> ObjectKey {
    let settings = settings();
    ObjectKey::namespaced(ObjectKind::Service, &settings.namespace, &settings.service_name)
}

pub fn namespace_key() -> ObjectKey {
    ObjectKey::cluster(ObjectKind::Namespace, settings().namespace)
}
