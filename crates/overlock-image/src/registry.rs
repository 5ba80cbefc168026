use crate::assembler::OciImageDraft;
use crate::resolver::TagLister;
use crate::types::ImageReference;
use async_trait::async_trait;
use oci_client::client::{ClientConfig, ClientProtocol, Config, ImageLayer, PushResponse};
use oci_client::manifest::OciImageManifest;
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use overlock_core::{Credentials, Error, Result};
use std::time::Duration;
use tracing::{debug, info, trace};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry operations the transports run
#[async_trait]
pub trait RegistryProtocol: Send + Sync {
    /// Push `draft` as `target`, returning the manifest URL
    async fn push(
        &self,
        target: &ImageReference,
        draft: &OciImageDraft,
        credentials: Option<&Credentials>,
    ) -> Result<String>;

    /// List every tag of `repository` (tag/digest of the reference ignored)
    async fn list_tags(
        &self,
        repository: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>>;
}

/// OCI distribution client
///
/// Loopback registries are reached through a tunnel to a registry with a
/// self-signed certificate, so certificate validation is skipped for them
/// and the scheme (HTTPS or plain HTTP) is probed. Every other host gets
/// plain HTTPS with full validation.
pub struct OciRegistryClient {
    probe: reqwest::Client,
}

impl OciRegistryClient {
    pub fn new() -> Result<Self> {
        let probe = reqwest::Client::builder()
            .user_agent(concat!("overlock/", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(true)
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| Error::registry("client setup", e))?;
        Ok(Self { probe })
    }

    async fn client_for(&self, host: &str) -> Client {
        let config = if is_loopback(host) {
            ClientConfig {
                protocol: self.detect_protocol(host).await,
                accept_invalid_certificates: true,
                ..Default::default()
            }
        } else {
            ClientConfig {
                protocol: ClientProtocol::Https,
                ..Default::default()
            }
        };
        Client::new(config)
    }

    /// HTTPS if anything answers a TLS request on `/v2/`, plain HTTP otherwise
    async fn detect_protocol(&self, host: &str) -> ClientProtocol {
        let url = format!("https://{}/v2/", host);
        match self.probe.get(&url).send().await {
            Ok(response) => {
                trace!("{} answered over HTTPS with {}", host, response.status());
                ClientProtocol::Https
            }
            Err(e) => {
                trace!("HTTPS probe of {} failed, using HTTP: {}", host, e);
                ClientProtocol::Http
            }
        }
    }
}

#[async_trait]
impl RegistryProtocol for OciRegistryClient {
    async fn push(
        &self,
        target: &ImageReference,
        draft: &OciImageDraft,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let reference = to_oci_reference(target)?;
        let client = self.client_for(reference.registry()).await;

        let layers: Vec<ImageLayer> = draft
            .layers
            .iter()
            .map(|layer| ImageLayer::new(layer.data.clone(), layer.media_type.clone(), None))
            .collect();
        let config = Config::new(
            draft.config.data.clone(),
            draft.config.media_type.clone(),
            None,
        );
        let mut manifest = OciImageManifest::build(&layers, &config, None);
        manifest.media_type = Some(draft.manifest_media_type.clone());

        debug!(
            "Pushing {} ({} layer(s), profile {})",
            target,
            layers.len(),
            draft.profile
        );

        let response: PushResponse = client
            .push(&reference, &layers, config, &to_auth(credentials), Some(manifest))
            .await
            .map_err(|e| Error::registry(format!("push {}", target), e))?;

        info!("Pushed {} ({})", target, response.manifest_url);
        Ok(response.manifest_url)
    }

    async fn list_tags(
        &self,
        repository: &ImageReference,
        credentials: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        let reference = to_oci_reference(repository)?;
        let client = self.client_for(reference.registry()).await;

        let response = client
            .list_tags(&reference, &to_auth(credentials), None, None)
            .await
            .map_err(|e| Error::registry(format!("list tags of {}", repository.name()), e))?;

        trace!("Found {} tags for {}", response.tags.len(), repository.name());
        Ok(response.tags)
    }
}

/// Lists tags directly from a network-reachable registry host
pub struct DirectTagLister<'a, P: ?Sized> {
    protocol: &'a P,
    registry: String,
    credentials: Option<&'a Credentials>,
}

impl<'a, P: RegistryProtocol + ?Sized> DirectTagLister<'a, P> {
    pub fn new(
        protocol: &'a P,
        registry: impl Into<String>,
        credentials: Option<&'a Credentials>,
    ) -> Self {
        Self {
            protocol,
            registry: registry.into(),
            credentials,
        }
    }
}

#[async_trait]
impl<P: RegistryProtocol + ?Sized> TagLister for DirectTagLister<'_, P> {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let reference = ImageReference::parse(repository)?.with_registry(self.registry.clone());
        self.protocol.list_tags(&reference, self.credentials).await
    }
}

/// True for `localhost`, `127.0.0.1` and `[::1]`, with or without a port
pub fn is_loopback(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

fn to_auth(credentials: Option<&Credentials>) -> RegistryAuth {
    match credentials {
        Some(c) => RegistryAuth::Basic(c.username.clone(), c.password.clone()),
        None => RegistryAuth::Anonymous,
    }
}

fn to_oci_reference(image: &ImageReference) -> Result<Reference> {
    let text = image.to_string();
    text.parse::<Reference>()
        .map_err(|e| Error::invalid_reference(text.clone(), e.to_string()))
}
