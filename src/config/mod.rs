//! Configuration management for Mosaic
//!
//! Mosaic reads three kinds of configuration:
//!
//! 1. **Global configuration** (`~/.mosaic/config.toml`) - registry URL,
//!    token, cache location and network tuning; see [`GlobalConfig`]
//! 2. **Project manifest** (`mosaic.toml`) - declared dependencies; see
//!    [`crate::manifest`]
//! 3. **Lockfile** (`mosaic.lock`) - resolved versions and hashes; see
//!    [`crate::lockfile`]
//!
//! Only the global configuration lives here.

mod global;

pub use global::{ENV_CACHE_DIR, ENV_CONFIG, ENV_REGISTRY_URL, ENV_TOKEN, GlobalConfig};
