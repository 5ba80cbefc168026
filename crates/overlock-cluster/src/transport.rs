//! Registry operations through a tunnel to the local registry

use crate::traits::ClusterHandle;
use crate::tunnel::{with_tunnel, TunnelTarget};
use async_trait::async_trait;
use overlock_core::Result;
use overlock_image::{ImageReference, OciImageDraft, RegistryProtocol, TagLister};
use std::sync::Arc;
use tracing::debug;

/// Push and list against the in-cluster registry, one tunnel per call
#[derive(Clone)]
pub struct LocalRegistryTransport {
    cluster: Arc<dyn ClusterHandle>,
    protocol: Arc<dyn RegistryProtocol>,
    target: TunnelTarget,
}

impl LocalRegistryTransport {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        protocol: Arc<dyn RegistryProtocol>,
        target: TunnelTarget,
    ) -> Self {
        Self {
            cluster,
            protocol,
            target,
        }
    }

    /// Push `draft` as `image_name` (e.g. `my-image:1.0`)
    ///
    /// Any registry host in `image_name` is replaced by the tunnel address.
    /// Returns the manifest URL.
    pub async fn push_via_tunnel(&self, image_name: &str, draft: &OciImageDraft) -> Result<String> {
        let image = ImageReference::parse(image_name)?;
        with_tunnel(self.cluster.as_ref(), &self.target, |address| async move {
            let target = image.with_registry(address);
            debug!("Try to push to reference: {}", target);
            self.protocol.push(&target, draft, None).await
        })
        .await
    }

    /// Tags of `repository` (e.g. `my-image`) in the local registry
    pub async fn list_tags_via_tunnel(&self, repository: &str) -> Result<Vec<String>> {
        let repository = ImageReference::parse(repository)?;
        with_tunnel(self.cluster.as_ref(), &self.target, |address| async move {
            let target = repository.with_registry(address);
            debug!("Listing tags for repository: {}", target.name());
            self.protocol.list_tags(&target, None).await
        })
        .await
    }
}

#[async_trait]
impl TagLister for LocalRegistryTransport {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.list_tags_via_tunnel(repository).await
    }
}
