//! Next-tag resolution
//!
//! Given a requested `repository:version` and the tags already in the
//! registry, pick the tag to publish: same `major.minor`, patch one past
//! the highest patch already published in that line.

use crate::types::ImageReference;
use async_trait::async_trait;
use overlock_core::{Error, Result};
use semver::Version;
use std::fmt;
use tracing::{debug, trace, warn};

/// Lists the tags of a repository
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}

/// Tags known for the repository, or why they could not be listed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingTags {
    Listed(Vec<String>),
    Unavailable(String),
}

impl From<Result<Vec<String>>> for ExistingTags {
    fn from(result: Result<Vec<String>>) -> Self {
        match result {
            Ok(tags) => ExistingTags::Listed(tags),
            Err(e) => ExistingTags::Unavailable(e.to_string()),
        }
    }
}

/// A requested reference paired with the registry's existing tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionQuery {
    pub reference: ImageReference,
    pub version: Version,
    pub existing_tags: ExistingTags,
}

impl VersionQuery {
    /// Parse `reference`; its tag must be a version
    pub fn parse(reference: &str, existing_tags: ExistingTags) -> Result<Self> {
        let reference = ImageReference::parse(reference)?;
        let version = match &reference.tag {
            Some(tag) => parse_version(tag)?,
            None => {
                return Err(Error::invalid_reference(
                    reference.to_string(),
                    "a version tag is required",
                ))
            }
        };
        Ok(Self {
            reference,
            version,
            existing_tags,
        })
    }
}

/// Tag chosen for publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTag {
    /// Repository name, including the registry host if one was given
    pub repository: String,
    pub version: Version,
}

impl fmt::Display for ResolvedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.version)
    }
}

/// Parse a tag as a semantic version, the way registry tags are written
///
/// A leading `v` is allowed and missing minor/patch components default to
/// zero, so `v1.2` parses as `1.2.0`. Pre-release and build metadata are
/// kept.
pub fn parse_version(tag: &str) -> Result<Version> {
    let raw = tag.trim();
    let stripped = raw.strip_prefix('v').unwrap_or(raw);
    let split = stripped.find(['-', '+']).unwrap_or(stripped.len());
    let (core, suffix) = stripped.split_at(split);

    let parts: Vec<&str> = core.split('.').collect();
    let numeric = |p: &&str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
    if parts.len() > 3 || !parts.iter().all(numeric) {
        return Err(Error::invalid_version(tag));
    }

    let padded = match parts.len() {
        1 => format!("{}.0.0{}", core, suffix),
        2 => format!("{}.0{}", core, suffix),
        _ => format!("{}{}", core, suffix),
    };

    Version::parse(&padded).map_err(|_| Error::invalid_version(tag))
}

/// Compute the next tag for `query`
///
/// Pure: listing failures arrive as [`ExistingTags::Unavailable`] and fall
/// back to `<major>.<minor>.0`.
pub fn resolve_next_tag(query: &VersionQuery) -> Result<ResolvedTag> {
    let requested = &query.version;

    let patch = match &query.existing_tags {
        ExistingTags::Unavailable(reason) => {
            warn!(
                "Could not list tags for {}, publishing {}.{}.0: {}",
                query.reference.name(),
                requested.major,
                requested.minor,
                reason
            );
            0
        }
        ExistingTags::Listed(tags) => {
            let max_patch = tags
                .iter()
                .filter_map(|tag| match parse_version(tag) {
                    Ok(version) => Some(version),
                    Err(_) => {
                        trace!("Skipping non-semver tag: {}", tag);
                        None
                    }
                })
                .filter(|v| v.major == requested.major && v.minor == requested.minor)
                .map(|v| v.patch)
                .max();

            match max_patch {
                Some(patch) => patch.checked_add(1).ok_or_else(|| {
                    Error::invalid_version(format!(
                        "{}.{}.{}",
                        requested.major, requested.minor, patch
                    ))
                })?,
                None => 0,
            }
        }
    };

    let resolved = ResolvedTag {
        repository: query.reference.name(),
        version: Version::new(requested.major, requested.minor, patch),
    };
    debug!("Resolved {} to {}", query.reference, resolved);
    Ok(resolved)
}

/// Resolve the next tag for `reference` against an already listed tag set
pub fn next_tag(reference: &str, existing_tags: &[String]) -> Result<String> {
    let query = VersionQuery::parse(reference, ExistingTags::Listed(existing_tags.to_vec()))?;
    Ok(resolve_next_tag(&query)?.to_string())
}

/// Resolves next tags against a live registry
pub struct VersionResolver<L> {
    lister: L,
}

impl<L: TagLister> VersionResolver<L> {
    pub fn new(lister: L) -> Self {
        Self { lister }
    }

    /// Resolve the tag to publish for `reference`
    ///
    /// The reference is parsed before anything is listed; a bad version
    /// fails without touching the registry.
    pub async fn resolve_next_tag(&self, reference: &str) -> Result<ResolvedTag> {
        let mut query = VersionQuery::parse(reference, ExistingTags::Listed(Vec::new()))?;
        query.existing_tags = self
            .lister
            .list_tags(&query.reference.repository)
            .await
            .into();
        resolve_next_tag(&query)
    }
}
