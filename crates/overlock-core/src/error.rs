//! Error types for overlock-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using overlock-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by wrapped failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error taxonomy shared by the registry, image and cluster crates
#[derive(Error, Debug)]
pub enum Error {
    /// Client construction or kubeconfig failure
    #[error("kubernetes connection error{}: {message}", context_suffix(.context))]
    KubernetesConnection {
        context: Option<String>,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A cluster API call failed after the idempotent path was exhausted
    #[error("{operation} failed: {source}")]
    Api {
        operation: String,
        #[source]
        source: BoxError,
    },

    /// Workload never reported a ready replica within the timeout
    #[error("local registry '{name}' did not become ready within {}s", .timeout.as_secs())]
    NotReady { name: String, timeout: Duration },

    /// No pod matched the tunnel selector
    #[error("no pod matching '{selector}' found in namespace '{namespace}'")]
    PodNotFound { namespace: String, selector: String },

    /// Could not allocate a local port for the tunnel
    #[error("failed to allocate local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// The forwarder exited without ever signalling ready
    #[error("tunnel to pods matching '{selector}' in namespace '{namespace}' closed before it was ready")]
    TunnelClosed { namespace: String, selector: String },

    /// Port-forward dial/upgrade failure
    #[error("port-forward to pod '{pod}' failed: {message}")]
    Dial { pod: String, message: String },

    /// Registry protocol failure (push, list)
    #[error("registry {operation} failed: {message}")]
    Registry { operation: String, message: String },

    /// Chart install/upgrade failure
    #[error("chart release '{release}' failed: {message}")]
    Chart { release: String, message: String },

    /// The archive produced no image layer
    #[error("no layers found in image built from {}", .path.display())]
    NoLayers { path: PathBuf },

    /// The archive is not a readable tar stream
    #[error("malformed archive {}: {message}", .path.display())]
    MalformedArchive { path: PathBuf, message: String },

    /// Invalid image reference
    #[error("invalid image reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Invalid semver version
    #[error("Invalid version format: {version}")]
    InvalidVersion { version: String },

    /// Invalid configuration value
    #[error("invalid configuration: field '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn context_suffix(context: &Option<String>) -> String {
    match context {
        Some(ctx) => format!(": context '{}'", ctx),
        None => String::new(),
    }
}

impl Error {
    /// Wrap a cluster API failure with the name of the failing step
    pub fn api(
        operation: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Api {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Create a kubernetes connection error
    pub fn connection(
        context: Option<&str>,
        message: impl Into<String>,
        source: Option<BoxError>,
    ) -> Self {
        Self::KubernetesConnection {
            context: context.map(str::to_string),
            message: message.into(),
            source,
        }
    }

    /// Create a registry protocol error
    pub fn registry(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Registry {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a chart error
    pub fn chart(release: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Chart {
            release: release.into(),
            message: message.into(),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for the readiness timeout
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// True for cluster connectivity failures
    pub fn is_kubernetes_connection(&self) -> bool {
        matches!(self, Self::KubernetesConnection { .. })
    }
}
