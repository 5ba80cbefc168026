//! Registry endpoint types

use crate::config::RegistrySettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry login credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

// Keep passwords out of debug logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Where images are pushed
///
/// `is_local` selects the tunnel transport instead of direct network
/// access. An endpoint is built by the caller before an operation and is
/// not modified while the operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Registry name, used to key the pull policy
    pub name: String,

    /// Registry host (and optional port) images are addressed by
    pub server_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub is_default: bool,

    #[serde(default)]
    pub is_local: bool,

    /// Kubeconfig context; `None` uses the current context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_context: Option<String>,
}

impl RegistryEndpoint {
    /// Remote registry reached over the network
    pub fn remote(name: impl Into<String>, server_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_address: server_address.into(),
            credentials: None,
            is_default: false,
            is_local: false,
            cluster_context: None,
        }
    }

    /// The in-cluster registry described by `settings`
    pub fn local(settings: &RegistrySettings) -> Self {
        Self {
            name: settings.deployment_name.clone(),
            server_address: settings.service_host(),
            credentials: None,
            is_default: false,
            is_local: true,
            cluster_context: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.cluster_context = context.filter(|c| !c.is_empty());
        self
    }

    /// Check the endpoint is usable before any cluster call
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_config("name", "registry name is required"));
        }
        if !self.is_local && self.server_address.is_empty() {
            return Err(Error::invalid_config(
                "serverAddress",
                "remote registries need a server address",
            ));
        }
        if let Some(creds) = &self.credentials {
            if creds.username.is_empty() {
                return Err(Error::invalid_config(
                    "username",
                    "credentials need a username",
                ));
            }
        }
        Ok(())
    }
}
