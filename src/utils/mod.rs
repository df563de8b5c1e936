//! Utilities shared across modules.
//!
//! - [`fs`] - Atomic writes, staged temp files and manifest discovery

pub mod fs;

pub use fs::{atomic_write, ensure_dir, find_manifest, stage_file};
