//! OCI image handling for Overlock
//!
//! This crate provides:
//! - Image reference parsing
//! - Deterministic one-layer OCI image assembly from an archive, under a
//!   generic or a Helm chart media-type profile
//! - Next-tag resolution over semantic versions
//! - An OCI distribution client for push and tag listing
//!
//! # Example
//!
//! ```no_run
//! use overlock_image::{build_image, next_tag, ImageProfile};
//!
//! fn main() -> overlock_core::Result<()> {
//!     let draft = build_image("mychart-0.1.0.tgz", ImageProfile::HelmChart)?;
//!     println!("{} layer(s)", draft.layers.len());
//!
//!     let existing = vec!["0.1.0".to_string(), "0.1.3".to_string()];
//!     println!("{}", next_tag("mychart:0.1.0", &existing)?); // mychart:0.1.4
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod registry;
pub mod resolver;
pub mod types;

pub use assembler::{build_image, Blob, ImageProfile, OciImageDraft};
pub use registry::{is_loopback, DirectTagLister, OciRegistryClient, RegistryProtocol};
pub use resolver::{
    next_tag, parse_version, resolve_next_tag, ExistingTags, ResolvedTag, TagLister,
    VersionQuery, VersionResolver,
};
pub use types::{ImageManifest, ImageReference, ManifestConfig, ManifestLayer};

/// Version of the overlock-image crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
