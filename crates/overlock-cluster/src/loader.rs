//! Image loading: assemble, resolve the tag, push

use crate::bootstrap::BootstrapReconciler;
use crate::transport::LocalRegistryTransport;
use overlock_core::{Error, RegistryEndpoint, Result};
use overlock_image::{
    build_image, DirectTagLister, ImageProfile, ImageReference, OciImageDraft, RegistryProtocol,
    VersionResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One image to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Archive to build the image from
    pub archive: PathBuf,
    /// Image name and tag (e.g. `my-image:1.0`)
    pub image: String,
    /// Publish the next patch version instead of the requested tag
    pub upgrade: bool,
    pub profile: ImageProfile,
}

/// Loads archives as images into a registry
pub struct ImageLoader {
    reconciler: Arc<BootstrapReconciler>,
    transport: LocalRegistryTransport,
    protocol: Arc<dyn RegistryProtocol>,
}

impl ImageLoader {
    pub fn new(
        reconciler: Arc<BootstrapReconciler>,
        transport: LocalRegistryTransport,
        protocol: Arc<dyn RegistryProtocol>,
    ) -> Self {
        Self {
            reconciler,
            transport,
            protocol,
        }
    }

    /// Load `request` into `endpoint`, returning the image name pushed
    ///
    /// A local endpoint gets its registry created first if no registry pod
    /// exists, and every registry call goes through a tunnel.
    pub async fn load(&self, endpoint: &RegistryEndpoint, request: &LoadRequest) -> Result<String> {
        endpoint.validate()?;
        debug!("Loading image from: {}", request.archive.display());

        if endpoint.is_local {
            self.load_local(endpoint, request).await
        } else {
            self.load_remote(endpoint, request).await
        }
    }

    async fn load_local(&self, endpoint: &RegistryEndpoint, request: &LoadRequest) -> Result<String> {
        match self.reconciler.is_local_registry().await {
            Ok(true) => debug!("Local registry found"),
            Ok(false) => self.create_registry(endpoint).await?,
            Err(e) => {
                debug!("Could not look up local registry: {}", e);
                self.create_registry(endpoint).await?
            }
        }

        let draft = assemble(request).await?;

        let image_name = if request.upgrade {
            debug!("Upgrading image version");
            VersionResolver::new(self.transport.clone())
                .resolve_next_tag(&request.image)
                .await?
                .to_string()
        } else {
            request.image.clone()
        };

        debug!("Pushing image to local registry as: {}", image_name);
        self.transport.push_via_tunnel(&image_name, &draft).await?;

        info!("Image {} loaded to local registry", image_name);
        Ok(image_name)
    }

    async fn load_remote(&self, endpoint: &RegistryEndpoint, request: &LoadRequest) -> Result<String> {
        load_remote(self.protocol.as_ref(), endpoint, request).await
    }

    async fn create_registry(&self, endpoint: &RegistryEndpoint) -> Result<()> {
        self.reconciler.ensure_local_registry(endpoint).await?;
        Ok(())
    }
}

/// Load `request` straight into a remote registry
///
/// Needs no cluster: tags are listed and the image is pushed with
/// `protocol` against `endpoint.server_address`.
pub async fn load_remote(
    protocol: &dyn RegistryProtocol,
    endpoint: &RegistryEndpoint,
    request: &LoadRequest,
) -> Result<String> {
    endpoint.validate()?;
    if endpoint.is_local {
        return Err(Error::invalid_config(
            "isLocal",
            format!("registry '{}' is loaded through the cluster", endpoint.name),
        ));
    }

    let credentials = endpoint.credentials.as_ref();
    let draft = assemble(request).await?;

    let image_name = if request.upgrade {
        let lister = DirectTagLister::new(protocol, &endpoint.server_address, credentials);
        VersionResolver::new(lister)
            .resolve_next_tag(&request.image)
            .await?
            .to_string()
    } else {
        request.image.clone()
    };

    let mut target = ImageReference::parse(&image_name)?;
    if target.registry.is_none() {
        target = target.with_registry(endpoint.server_address.clone());
    }

    protocol.push(&target, &draft, credentials).await?;

    info!("Image {} loaded to registry '{}'", target, endpoint.name);
    Ok(target.to_string())
}

/// Build the image on the blocking pool
async fn assemble(request: &LoadRequest) -> Result<OciImageDraft> {
    let archive = request.archive.clone();
    let profile = request.profile;
    tokio::task::spawn_blocking(move || build_image(archive, profile))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
