//! Shared setup for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use mosaic_cli::installer::Installer;
use mosaic_cli::models::PackageSpec;
use mosaic_cli::test_utils::{MemoryRegistry, ProjectFixture, init_test_logging};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A project, a registry and an installer wired together.
pub struct TestProject {
    pub fixture: ProjectFixture,
    pub registry: Arc<MemoryRegistry>,
}

pub fn fixed_clock() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

pub fn later_clock() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T08:30:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

pub fn spec(s: &str) -> PackageSpec {
    PackageSpec::parse(s).unwrap()
}

impl TestProject {
    pub fn new() -> Self {
        Self::with_place(mosaic_cli::test_utils::SAMPLE_PLACE)
    }

    pub fn with_place(place: &str) -> Self {
        init_test_logging(None);
        Self {
            fixture: ProjectFixture::with_place(place),
            registry: Arc::new(MemoryRegistry::new()),
        }
    }

    /// Another project publishing from the same registry.
    pub fn sibling(&self) -> Self {
        Self {
            fixture: ProjectFixture::new(),
            registry: self.registry.clone(),
        }
    }

    pub fn installer(&self) -> Installer {
        self.installer_with_clock(fixed_clock)
    }

    pub fn installer_with_clock(&self, clock: fn() -> DateTime<Utc>) -> Installer {
        self.build_installer(&self.fixture.cache_dir(), clock)
    }

    /// An installer using `cache_dir` instead of the project's own cache.
    pub fn installer_with_cache(&self, cache_dir: &Path) -> Installer {
        self.build_installer(cache_dir, fixed_clock)
    }

    fn build_installer(&self, cache_dir: &Path, clock: fn() -> DateTime<Utc>) -> Installer {
        Installer::new(self.fixture.manifest_path(), self.registry.clone(), cache_dir, 4)
            .with_clock(clock)
            .with_lock_timeout(Duration::from_secs(10))
    }

    pub fn project(&self) -> String {
        std::fs::read_to_string(self.fixture.project_path()).unwrap()
    }

    pub fn manifest(&self) -> String {
        std::fs::read_to_string(self.fixture.manifest_path()).unwrap()
    }

    pub fn lockfile(&self) -> String {
        std::fs::read_to_string(self.fixture.lockfile_path()).unwrap()
    }
}
