//! Common test utilities for overlock-cluster
//!
//! This module provides shared test infrastructure including:
//! - An in-memory cluster with echoing pod streams
//! - Mock chart installer and registry client
//! - Fixtures wiring the reconciler and loader against the mocks

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
