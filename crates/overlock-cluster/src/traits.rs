//! Cluster API abstraction
//!
//! The reconciler and the tunnel only talk to the cluster through
//! [`ClusterHandle`], so tests can run them against an in-memory cluster.

use crate::objects::{ApplyOutcome, ClusterObject, ObjectKey};
use async_trait::async_trait;
use overlock_core::Result;
use tokio::io::{AsyncRead, AsyncWrite};

/// Bidirectional byte stream to a pod port
pub trait PodIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PodIo for T {}

pub type PodStream = Box<dyn PodIo>;

/// Handle to one Kubernetes cluster
///
/// Implementations wrap API failures with the operation that failed, e.g.
/// `apply deployment overlock/overlock-registry failed: ...`.
#[async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<ClusterObject>>;

    /// Create an object that does not exist yet
    async fn create(&self, object: &ClusterObject) -> Result<()>;

    /// Create or update an object; identical desired state is a no-op
    async fn apply(&self, object: &ClusterObject) -> Result<ApplyOutcome>;

    /// Delete an object, returning `false` if it was already gone
    async fn delete(&self, key: &ObjectKey) -> Result<bool>;

    /// Names of the pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>>;

    /// Open a port-forward stream to `port` of `pod`
    async fn dial_pod(&self, namespace: &str, pod: &str, port: u16) -> Result<PodStream>;

    /// Create the object unless one with the same key exists
    ///
    /// Existence is checked by name only; a differing spec is left alone.
    async fn create_if_absent(&self, object: &ClusterObject) -> Result<ApplyOutcome> {
        if self.get(&object.key()).await?.is_some() {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.create(object).await?;
        Ok(ApplyOutcome::Created)
    }
}
