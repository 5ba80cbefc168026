//! CLI command implementations

pub mod registry;
