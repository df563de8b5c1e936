//! Global constants used throughout the Mosaic codebase.
//!
//! Timeouts, retry parameters, file names and other values that are shared
//! between modules live here so that magic numbers stay discoverable.

use std::time::Duration;

/// Manifest file name, looked up from the working directory upwards.
pub const MANIFEST_FILE: &str = "mosaic.toml";

/// Lockfile file name, always a sibling of the manifest.
pub const LOCKFILE_FILE: &str = "mosaic.lock";

/// Extension of Polytoria project files that receive injected modules.
pub const PROJECT_FILE_EXTENSION: &str = "poly";

/// Per-project state directory (advisory locks live below it).
pub const PROJECT_STATE_DIR: &str = ".mosaic";

/// Registry used when neither the config file nor the environment names one.
pub const DEFAULT_REGISTRY_URL: &str = "https://api.getmosaic.run";

/// Default timeout for project lock acquisition (60 seconds).
///
/// Another `mosaic` process holding the lock is normally done within a few
/// seconds; a minute covers slow downloads on the other side.
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Maximum backoff delay for exponential backoff (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting delay for exponential backoff (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Default timeout applied to every registry request.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of retries after the first failed registry request.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// First delay between registry retries (doubles on every attempt).
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Upper bound for a single registry retry delay.
pub const RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Minimum number of parallel blob downloads regardless of CPU count.
pub const MIN_PARALLELISM: usize = 10;

/// Multiplier applied to CPU core count for default parallelism.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Default CPU core count when detection fails.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Default download parallelism: `max(10, 2 x cores)`.
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    (cores * PARALLELISM_CORE_MULTIPLIER).max(MIN_PARALLELISM)
}
