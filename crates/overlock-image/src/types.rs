use overlock_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .expect("repository regex is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex is valid"));

/// Image reference with optional registry host, repository, and tag/digest
///
/// Unlike Docker's defaults, a reference without a registry host keeps
/// `registry = None`: the target registry is decided by the transport
/// (a tunnel's loopback address or a remote endpoint), not by the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host (e.g., "localhost:5000", "ghcr.io")
    pub registry: Option<String>,
    /// Repository path (e.g., "my-image", "team/chart")
    pub repository: String,
    /// Tag (e.g., "1.0") - mutually exclusive with digest
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...") - mutually exclusive with tag
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string like "localhost:5000/my-image:1.0"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_reference(s, "reference is empty"));
        }

        // Split by @ for digest references
        let (image_part, digest) = match s.split_once('@') {
            Some((before, after)) => (before, Some(after.to_string())),
            None => (s, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a host port
        let (name, tag) = match image_part.rfind(':') {
            Some(idx) if !image_part[idx + 1..].contains('/') => {
                (&image_part[..idx], Some(image_part[idx + 1..].to_string()))
            }
            _ => (image_part, None),
        };

        // First path component is a registry host only if it looks like one
        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, name.to_string()),
        };

        if !REPOSITORY_RE.is_match(&repository) {
            return Err(Error::invalid_reference(
                s,
                format!("invalid repository name '{}'", repository),
            ));
        }

        if let Some(tag) = &tag {
            if !TAG_RE.is_match(tag) {
                return Err(Error::invalid_reference(s, format!("invalid tag '{}'", tag)));
            }
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Repository name including the registry host, without tag or digest
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Tag or digest identifying the image, defaulting to "latest"
    pub fn identifier(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }

    /// Same repository and tag, addressed at another registry host
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        Self {
            registry: Some(registry.into()),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self.name();
        if let Some(digest) = &self.digest {
            write!(f, "{}@{}", base, digest)
        } else if let Some(tag) = &self.tag {
            write!(f, "{}:{}", base, tag)
        } else {
            write!(f, "{}:latest", base)
        }
    }
}

/// OCI image manifest as written to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: i32,
    pub media_type: String,
    pub config: ManifestConfig,
    pub layers: Vec<ManifestLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestConfig {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestLayer {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}
