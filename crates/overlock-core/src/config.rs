//! Registry settings
//!
//! Every fixed constant of the local registry (ports, names, certificate
//! windows, readiness timing, chart coordinates) lives in one immutable
//! [`RegistrySettings`] value. The defaults match what the CLI ships with;
//! an optional `overlock.yaml` can override individual fields.

use crate::error::{Error, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::debug;

/// Configuration file names searched in the working directory
pub const CONFIG_FILE_NAMES: &[&str] = &["overlock.yaml", "overlock.yml"];

/// Namespace holding the registry objects
pub const DEFAULT_NAMESPACE: &str = "overlock";

/// Registry deployment name, also the pod `app` label value
pub const DEFAULT_DEPLOYMENT_NAME: &str = "overlock-registry";

/// Registry service name
pub const DEFAULT_SERVICE_NAME: &str = "registry";

/// Internal registry listener port
pub const DEFAULT_REGISTRY_PORT: u16 = 5000;

/// Node port exposing the proxy's HTTP port on every node
pub const DEFAULT_NODE_PORT: u16 = 30100;

/// Settings for the in-cluster registry, its certificate, and its tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistrySettings {
    /// Namespace for all registry objects
    pub namespace: String,

    /// Deployment name (pods are labelled `app=<deployment_name>`)
    pub deployment_name: String,

    /// Service name
    pub service_name: String,

    /// Registry process image
    pub registry_image: String,

    /// TLS-terminating proxy image
    pub proxy_image: String,

    /// Registry listener port, also the tunnel's remote port
    pub registry_port: u16,

    /// Proxy HTTP port
    pub proxy_http_port: u16,

    /// Proxy HTTPS port
    pub proxy_https_port: u16,

    /// Externally reachable node port of the proxy HTTP port
    pub node_port: u16,

    /// Cluster DNS suffix used in the certificate's names
    pub cluster_domain: String,

    pub certificate: CertificateSettings,

    pub readiness: ReadinessSettings,

    /// cert-manager chart
    pub cert_manager: ChartSettings,

    /// Policy controller chart
    pub policy_controller: ChartSettings,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            registry_image: "registry:2".to_string(),
            proxy_image: "nginx:alpine".to_string(),
            registry_port: DEFAULT_REGISTRY_PORT,
            proxy_http_port: 80,
            proxy_https_port: 443,
            node_port: DEFAULT_NODE_PORT,
            cluster_domain: "cluster.local".to_string(),
            certificate: CertificateSettings::default(),
            readiness: ReadinessSettings::default(),
            cert_manager: ChartSettings::cert_manager(),
            policy_controller: ChartSettings::kyverno(),
        }
    }
}

impl RegistrySettings {
    /// Load settings from an explicit path, or from `overlock.yaml` in the
    /// working directory when present, falling back to defaults
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_owned()),
            None => CONFIG_FILE_NAMES
                .iter()
                .map(Utf8Path::new)
                .find(|p| p.exists())
                .map(|p| p.to_owned()),
        };

        let settings = match path {
            Some(path) => {
                debug!("Loading registry settings from {}", path);
                let content = fs::read_to_string(&path)?;
                Self::from_yaml(&content)?
            }
            None => Self::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from YAML; absent fields keep their defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Reject values the cluster would refuse or the poll loop cannot honor
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("namespace", &self.namespace),
            ("deploymentName", &self.deployment_name),
            ("serviceName", &self.service_name),
        ] {
            if value.is_empty() {
                return Err(Error::invalid_config(field, "must not be empty"));
            }
        }

        for (field, port) in [
            ("registryPort", self.registry_port),
            ("proxyHttpPort", self.proxy_http_port),
            ("proxyHttpsPort", self.proxy_https_port),
        ] {
            if port == 0 {
                return Err(Error::invalid_config(field, "port must be non-zero"));
            }
        }

        if !(30000..=32767).contains(&self.node_port) {
            return Err(Error::invalid_config(
                "nodePort",
                format!("{} is outside the node port range 30000-32767", self.node_port),
            ));
        }

        if self.readiness.poll_interval_secs == 0 {
            return Err(Error::invalid_config(
                "readiness.pollIntervalSecs",
                "must be at least 1",
            ));
        }

        if self.readiness.timeout_secs < self.readiness.poll_interval_secs {
            return Err(Error::invalid_config(
                "readiness.timeoutSecs",
                "must not be shorter than the poll interval",
            ));
        }

        Ok(())
    }

    /// Label selector matching the registry pods
    pub fn pod_selector(&self) -> String {
        format!("app={}", self.deployment_name)
    }

    /// In-cluster FQDN of the registry service
    pub fn service_host(&self) -> String {
        format!(
            "{}.{}.svc.{}",
            self.service_name, self.namespace, self.cluster_domain
        )
    }

    /// DNS names bound to the registry certificate
    pub fn certificate_dns_names(&self) -> Vec<String> {
        let svc = &self.service_name;
        let ns = &self.namespace;
        vec![
            svc.clone(),
            format!("{}.{}", svc, ns),
            format!("{}.{}.svc", svc, ns),
            format!("{}.{}.svc.{}", svc, ns, self.cluster_domain),
            "localhost".to_string(),
        ]
    }
}

/// Certificate issued for the registry proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CertificateSettings {
    pub issuer_name: String,
    pub certificate_name: String,
    pub secret_name: String,
    /// Validity window (Go duration syntax, as cert-manager expects)
    pub duration: String,
    pub renew_before: String,
    pub ip_addresses: Vec<String>,
}

impl Default for CertificateSettings {
    fn default() -> Self {
        Self {
            issuer_name: "overlock-selfsigned".to_string(),
            certificate_name: "registry-tls".to_string(),
            secret_name: "registry-tls".to_string(),
            duration: "8760h".to_string(),
            renew_before: "720h".to_string(),
            ip_addresses: vec!["127.0.0.1".to_string()],
        }
    }
}

/// Readiness polling of the registry deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReadinessSettings {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            timeout_secs: 30,
        }
    }
}

impl ReadinessSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Helm chart coordinates for a cluster add-on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSettings {
    pub chart: String,
    pub version: String,
    pub repo_url: String,
    pub release: String,
    pub namespace: String,
    /// `--set` values passed on install
    #[serde(default)]
    pub values: Vec<(String, String)>,
}

impl ChartSettings {
    /// cert-manager with its CRDs
    pub fn cert_manager() -> Self {
        Self {
            chart: "cert-manager".to_string(),
            version: "v1.16.2".to_string(),
            repo_url: "https://charts.jetstack.io".to_string(),
            release: "cert-manager".to_string(),
            namespace: "cert-manager".to_string(),
            values: vec![("crds.enabled".to_string(), "true".to_string())],
        }
    }

    /// Kyverno policy engine
    pub fn kyverno() -> Self {
        Self {
            chart: "kyverno".to_string(),
            version: "3.3.4".to_string(),
            repo_url: "https://kyverno.github.io/kyverno".to_string(),
            release: "kyverno".to_string(),
            namespace: "kyverno".to_string(),
            values: Vec::new(),
        }
    }
}
