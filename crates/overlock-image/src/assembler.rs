//! OCI image assembly from a flat archive
//!
//! An archive becomes a one-layer image. The profile only decides the
//! config and layer media types; the manifest is always an OCI image
//! manifest, since Helm-aware and generic registry clients dispatch on
//! those media types alone.

use crate::types::{ImageManifest, ManifestConfig, ManifestLayer};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use overlock_core::{Error, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// OCI image manifest media type, shared by every profile
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

pub const OCI_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const HELM_CONFIG_MEDIA_TYPE: &str = "application/vnd.cncf.helm.config.v1+json";
pub const HELM_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Media-type scheme applied to an assembled image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageProfile {
    #[default]
    Generic,
    HelmChart,
}

impl ImageProfile {
    pub fn config_media_type(self) -> &'static str {
        match self {
            ImageProfile::Generic => OCI_CONFIG_MEDIA_TYPE,
            ImageProfile::HelmChart => HELM_CONFIG_MEDIA_TYPE,
        }
    }

    pub fn layer_media_type(self) -> &'static str {
        match self {
            ImageProfile::Generic => OCI_LAYER_MEDIA_TYPE,
            ImageProfile::HelmChart => HELM_LAYER_MEDIA_TYPE,
        }
    }
}

impl fmt::Display for ImageProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageProfile::Generic => write!(f, "generic"),
            ImageProfile::HelmChart => write!(f, "helm-chart"),
        }
    }
}

/// Content-addressed blob ready to upload
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    pub media_type: String,
    pub data: Vec<u8>,
    /// `sha256:<hex>` of `data`
    pub digest: String,
}

impl Blob {
    pub fn new(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        let digest = sha256_digest(&data);
        Self {
            media_type: media_type.into(),
            data,
            digest,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("media_type", &self.media_type)
            .field("size", &self.data.len())
            .field("digest", &self.digest)
            .finish()
    }
}

/// Image assembled in memory, not yet pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciImageDraft {
    pub profile: ImageProfile,
    pub config: Blob,
    pub layers: Vec<Blob>,
    pub manifest_media_type: String,
}

impl OciImageDraft {
    /// Manifest describing the config and layers in order
    pub fn manifest(&self) -> ImageManifest {
        ImageManifest {
            schema_version: 2,
            media_type: self.manifest_media_type.clone(),
            config: ManifestConfig {
                media_type: self.config.media_type.clone(),
                size: self.config.size(),
                digest: self.config.digest.clone(),
            },
            layers: self
                .layers
                .iter()
                .map(|layer| ManifestLayer {
                    media_type: layer.media_type.clone(),
                    size: layer.size(),
                    digest: layer.digest.clone(),
                })
                .collect(),
        }
    }
}

/// Build a one-layer image from `archive_path`
///
/// The archive may be a plain or gzip-compressed tar. A gzip archive is
/// used as the layer blob unchanged; a plain tar is compressed first.
pub fn build_image(archive_path: impl AsRef<Path>, profile: ImageProfile) -> Result<OciImageDraft> {
    let path = archive_path.as_ref();
    let raw = std::fs::read(path)?;

    if raw.is_empty() {
        return Err(Error::NoLayers {
            path: path.to_path_buf(),
        });
    }

    let (compressed, uncompressed) = if raw.starts_with(&GZIP_MAGIC) {
        let mut uncompressed = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut uncompressed)
            .map_err(|e| Error::MalformedArchive {
                path: path.to_path_buf(),
                message: format!("invalid gzip stream: {}", e),
            })?;
        (raw, uncompressed)
    } else {
        let compressed = gzip(&raw)?;
        (compressed, raw)
    };

    let entries = check_tar(&uncompressed).map_err(|e| Error::MalformedArchive {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!(
        "Assembling {} image from {} ({} entries, {} bytes compressed)",
        profile,
        path.display(),
        entries,
        compressed.len()
    );

    let diff_id = sha256_digest(&uncompressed);
    let config = json!({
        "architecture": "",
        "os": "",
        "config": {},
        "rootfs": {
            "type": "layers",
            "diff_ids": [diff_id],
        },
    });

    Ok(OciImageDraft {
        profile,
        config: Blob::new(profile.config_media_type(), serde_json::to_vec(&config)?),
        layers: vec![Blob::new(profile.layer_media_type(), compressed)],
        manifest_media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
    })
}

/// `sha256:<hex>` digest of `data`
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    // Default header has no mtime or file name, so output is reproducible
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn check_tar(data: &[u8]) -> std::io::Result<usize> {
    let mut archive = tar::Archive::new(data);
    let mut count = 0;
    for entry in archive.entries()? {
        entry?;
        count += 1;
    }
    Ok(count)
}
