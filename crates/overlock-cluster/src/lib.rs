//! In-cluster registry lifecycle and transport for Overlock
//!
//! This crate provides:
//!
//! - **Bootstrap** - idempotent reconciliation of the registry namespace,
//!   TLS material, configuration, deployment, service and pull policy
//! - **Tunnel** - a single-use port-forward to the registry pod with a
//!   ready/stop handshake around one operation
//! - **Transport** - push and tag listing against the local registry, one
//!   tunnel per call
//! - **Loader** - archive-to-registry image loading for local and remote
//!   registries
//!
//! # Example
//!
//! ```ignore
//! use overlock_cluster::{BootstrapReconciler, KubeCluster};
//!
//! let cluster = Arc::new(KubeCluster::connect(None).await?);
//! let reconciler = BootstrapReconciler::new(cluster, issuer, policies, settings);
//! reconciler.ensure_local_registry(&endpoint).await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ImageLoader
//!   ├── BootstrapReconciler ── CertificateIssuer, PolicyRegistrar
//!   └── LocalRegistryTransport ── Tunnel ── ClusterHandle (trait)
//!                                              └── KubeCluster
//! ```

pub mod bootstrap;
pub mod certmanager;
pub mod helm;
pub mod kube_client;
pub mod loader;
pub mod objects;
pub mod policy;
pub mod traits;
pub mod transport;
pub mod tunnel;

pub use bootstrap::BootstrapReconciler;
pub use certmanager::{CertManager, CertificateIssuer};
pub use helm::{ensure_release, ChartInstaller, HelmCli};
pub use kube_client::KubeCluster;
pub use loader::{load_remote, ImageLoader, LoadRequest};
pub use objects::{ApplyOutcome, ClusterObject, ObjectKey, ObjectKind};
pub use policy::{KyvernoPolicies, PolicyRegistrar};
pub use traits::{ClusterHandle, PodIo, PodStream};
pub use transport::LocalRegistryTransport;
pub use tunnel::{with_tunnel, StopSignal, Tunnel, TunnelLog, TunnelTarget};
