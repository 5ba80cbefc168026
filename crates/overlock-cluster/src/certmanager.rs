//! Registry certificate issuance through cert-manager

use crate::helm::{ensure_release, ChartInstaller};
use crate::objects::ClusterObject;
use crate::traits::ClusterHandle;
use async_trait::async_trait;
use kube::CustomResource;
use overlock_core::{RegistrySettings, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// cert-manager `ClusterIssuer`
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "ClusterIssuer",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfSignedIssuer {}

/// cert-manager `Certificate`
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    pub secret_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub issuer_ref: IssuerRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
}

/// Self-signed cluster-wide issuer
pub fn self_signed_issuer(settings: &RegistrySettings) -> ClusterObject {
    ClusterObject::ClusterIssuer(ClusterIssuer::new(
        &settings.certificate.issuer_name,
        ClusterIssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
        },
    ))
}

/// Certificate for the registry service names and loopback
pub fn registry_certificate(settings: &RegistrySettings) -> ClusterObject {
    let cert = &settings.certificate;
    let mut certificate = Certificate::new(
        &cert.certificate_name,
        CertificateSpec {
            secret_name: cert.secret_name.clone(),
            duration: Some(cert.duration.clone()),
            renew_before: Some(cert.renew_before.clone()),
            dns_names: settings.certificate_dns_names(),
            ip_addresses: cert.ip_addresses.clone(),
            issuer_ref: IssuerRef {
                name: cert.issuer_name.clone(),
                kind: "ClusterIssuer".to_string(),
            },
        },
    );
    certificate.metadata.namespace = Some(settings.namespace.clone());
    ClusterObject::Certificate(certificate)
}

/// Provisions the registry's TLS material
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Install the certificate controller (no-op when already installed)
    async fn install_cert_manager(&self) -> Result<()>;

    /// Create the self-signed issuer if no issuer of that name exists
    async fn create_self_signed_issuer(&self) -> Result<()>;

    /// Create the registry certificate if none of that name exists
    async fn create_registry_certificate(&self) -> Result<()>;

    /// Secret the certificate is written to
    fn registry_secret_name(&self) -> &str;
}

/// [`CertificateIssuer`] backed by the cert-manager chart
pub struct CertManager {
    cluster: Arc<dyn ClusterHandle>,
    charts: Arc<dyn ChartInstaller>,
    settings: RegistrySettings,
}

impl CertManager {
    pub fn new(
        cluster: Arc<dyn ClusterHandle>,
        charts: Arc<dyn ChartInstaller>,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            cluster,
            charts,
            settings,
        }
    }
}

#[async_trait]
impl CertificateIssuer for CertManager {
    async fn install_cert_manager(&self) -> Result<()> {
        ensure_release(self.charts.as_ref(), &self.settings.cert_manager).await
    }

    async fn create_self_signed_issuer(&self) -> Result<()> {
        let outcome = self
            .cluster
            .create_if_absent(&self_signed_issuer(&self.settings))
            .await?;
        debug!(
            "Cluster issuer {}: {:?}",
            self.settings.certificate.issuer_name, outcome
        );
        Ok(())
    }

    async fn create_registry_certificate(&self) -> Result<()> {
        let outcome = self
            .cluster
            .create_if_absent(&registry_certificate(&self.settings))
            .await?;
        debug!(
            "Certificate {}: {:?}",
            self.settings.certificate.certificate_name, outcome
        );
        Ok(())
    }

    fn registry_secret_name(&self) -> &str {
        &self.settings.certificate.secret_name
    }
}
