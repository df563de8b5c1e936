//! Integration test suite for Mosaic
//!
//! End-to-end tests of the installation pipeline through the library API,
//! with an in-memory registry, plus smoke tests of the `mosaic` binary.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **install**: install, sync, conflicts and idempotence
//! - **remove**: removal and orphan handling
//! - **determinism**: byte-identical lockfiles
//! - **integrity**: corrupt blobs and self-healing
//! - **project_tree**: non-destructive edits of hand-written project files
//! - **cli**: the `mosaic` binary, against a mock HTTP registry

mod common;

mod cli;
mod determinism;
mod install;
mod integrity;
mod project_tree;
mod remove;
