//! # overlock-core
//!
//! Core library shared by the Overlock crates:
//! - Error taxonomy for cluster, tunnel, registry and image failures
//! - Immutable registry settings with YAML overrides
//! - Registry endpoint and credential types

pub mod config;
pub mod error;
pub mod types;

pub use config::{CertificateSettings, ChartSettings, ReadinessSettings, RegistrySettings};
pub use error::{BoxError, Error, Result};
pub use types::{Credentials, RegistryEndpoint};
