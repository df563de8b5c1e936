//! Mosaic - package manager for Polytoria projects
//!
//! Mosaic installs Lua packages from the Mosaic registry into Polytoria
//! `.poly` project files. A project declares its dependencies in
//! `mosaic.toml`; Mosaic resolves exact versions, downloads and verifies
//! every package by sha256, records the result in `mosaic.lock` and injects
//! each package as a `ModuleScript` into the project file, leaving everything
//! the user wrote untouched.
//!
//! # Architecture Overview
//!
//! ```text
//! mosaic.toml ─> Resolver ─> DependencyGraph ─> BlobStore ─> Installer ─> mosaic.lock
//!                   │                              │             │          place.poly
//!              PackageSource ──────────────────────┘        ProjectTree     mosaic.toml
//! ```
//!
//! # Core Modules
//!
//! - [`manifest`] - `mosaic.toml`, edited without losing comments or formatting
//! - [`lockfile`] - `mosaic.lock`, deterministic record of the resolved graph
//! - [`resolver`] - exact-version resolution with conflict and cycle detection
//! - [`source`] - the registry seam: HTTP client, retries and timeouts
//! - [`cache`] - content-addressed, self-verifying blob cache
//! - [`project`] - arena model of the XML project file with node ownership
//! - [`installer`] - install, sync, remove and list with an atomic commit
//!
//! ## Supporting Modules
//!
//! - [`config`] - global `~/.mosaic/config.toml`
//! - [`core`] - error types and user-facing error rendering
//! - [`models`] - package names, content hashes and `name@version` specs
//! - [`version`] - version constraints
//! - [`utils`] - atomic file writes and manifest discovery
//! - [`cli`] - the `mosaic` command line
//!
//! # Manifest Format (mosaic.toml)
//!
//! ```toml
//! [package]
//! name = "space-race"
//! version = "0.1.0"
//!
//! [dependencies]
//! logger = "1.2.0"
//! "acme/net" = "0.4.1"
//! ```
//!
//! # Lockfile Format (mosaic.lock)
//!
//! ```toml
//! # Auto-generated lockfile - DO NOT EDIT
//! version = 1
//! generated_at = "2026-03-01T12:00:00Z"
//!
//! [[package]]
//! name = "logger"
//! version = "1.2.0"
//! checksum = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
//! source = "https://api.getmosaic.run"
//! dependencies = ["strings@0.2.0"]
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod installer;
pub mod lockfile;
pub mod manifest;
pub mod models;
pub mod project;
pub mod resolver;
pub mod source;
pub mod utils;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
