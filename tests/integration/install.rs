use anyhow::Result;
use mosaic_cli::core::{MosaicError, ResolutionError};
use mosaic_cli::project::ProjectTree;
use std::time::Duration;

use crate::common::{TestProject, spec};

/// Installing a package injects it and its dependencies, dependencies first
#[tokio::test]
async fn test_install_with_transitive_dependencies() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);

    let report = project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    assert_eq!(report.injected, vec!["strings@0.2.0", "logger@1.2.0"]);
    assert_eq!(report.resolved, 2);
    assert!(report.removed.is_empty());

    assert!(project.manifest().contains("logger = \"1.2.0\""));
    let lockfile = project.lockfile();
    assert!(lockfile.contains("name = \"logger\""));
    assert!(lockfile.contains("name = \"strings\""));
    assert!(lockfile.contains("dependencies = [\"strings@0.2.0\"]"));

    let tree = ProjectTree::load(&project.fixture.project_path())?;
    let modules: Vec<String> =
        tree.owned_nodes().iter().map(|owned| owned.provenance.package.to_string()).collect();
    assert_eq!(modules, vec!["strings", "logger"]);
    Ok(())
}

/// Module source lands in the project file as escaped XML text
#[tokio::test]
async fn test_installed_module_source_is_escaped() -> Result<()> {
    let project = TestProject::new();
    let archive = mosaic_cli::test_utils::build_archive(&[(
        "init.lua",
        "local t = {}\nif 1 < 2 and \"a\" ~= 'b' then t.ok = true end\nreturn t\n",
    )]);
    project.registry.publish_archive("compare", "1.0.0", &[], archive);

    project.installer().install(Some(&spec("compare@1.0.0"))).await?;
    let text = project.project();
    assert!(text.contains("if 1 &lt; 2 and &quot;a&quot; ~= &apos;b&apos; then"));
    assert!(text.contains("<string name=\"Name\">compare</string>"));
    Ok(())
}

/// Running sync twice leaves every file byte-identical and makes no requests
#[tokio::test]
async fn test_sync_is_idempotent() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;

    let before = (project.manifest(), project.lockfile(), project.project());
    let requests = project.registry.requests();

    for _ in 0..2 {
        let report = installer.sync().await?;
        assert!(report.is_noop(), "{report:?}");
        assert!(report.committed.is_empty());
    }

    assert_eq!((project.manifest(), project.lockfile(), project.project()), before);
    assert_eq!(project.registry.requests(), requests);
    Ok(())
}

/// A fresh installer with an empty cache restores the project from the lockfile
#[tokio::test]
async fn test_sync_restores_deleted_module() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    let installed = project.project();

    let mut tree = ProjectTree::load(&project.fixture.project_path())?;
    let owned = tree.owned_nodes();
    assert_eq!(tree.remove_owned(&owned[0].provenance), 1);
    std::fs::write(project.fixture.project_path(), tree.serialize())?;

    let metadata_before = project.registry.metadata_requests();
    let report = project.installer().sync().await?;
    assert!(report.lockfile_reused);
    assert_eq!(report.injected, vec!["logger@1.2.0"]);
    assert_eq!(report.committed, vec!["project file"]);
    assert_eq!(project.registry.metadata_requests(), metadata_before);
    assert_eq!(project.project(), installed);
    Ok(())
}

/// Declaring a new version replaces the injected module
#[tokio::test]
async fn test_upgrade_replaces_module() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    project.registry.publish("logger", "1.3.0", &[]);
    let installer = project.installer();

    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let report = installer.install(Some(&spec("logger@1.3.0"))).await?;
    assert_eq!(report.removed, vec!["logger@1.2.0"]);
    assert_eq!(report.injected, vec!["logger@1.3.0"]);

    let text = project.project();
    assert!(text.contains("-- logger@1.3.0"));
    assert!(!text.contains("-- logger@1.2.0"));
    assert!(project.manifest().contains("logger = \"1.3.0\""));
    Ok(())
}

/// Two packages pinning different versions of a shared dependency fail,
/// naming both requesters, and nothing is written
#[tokio::test]
async fn test_conflict_names_both_requesters() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.1.0", &[]);
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.1.0")]);
    project.registry.publish("net", "0.4.1", &[("strings", "0.2.0")]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;

    let before = (project.manifest(), project.lockfile(), project.project());
    let err = installer.install(Some(&spec("net@0.4.1"))).await.unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::Resolution(ResolutionError::VersionConflict {
            name,
            first_requester,
            second_requester,
            ..
        })) => {
            assert_eq!(name, "strings");
            let requesters = [first_requester.as_str(), second_requester.as_str()];
            assert!(requesters.contains(&"logger@1.2.0"), "{requesters:?}");
            assert!(requesters.contains(&"net@0.4.1"), "{requesters:?}");
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }
    assert_eq!((project.manifest(), project.lockfile(), project.project()), before);
    Ok(())
}

/// A direct pin and a different transitive pin of the same package conflict
#[tokio::test]
async fn test_direct_and_transitive_pins_conflict() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.1.0", &[]);
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    let installer = project.installer();
    installer.install(Some(&spec("strings@0.1.0"))).await?;

    let err = installer.install(Some(&spec("logger@1.2.0"))).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Version conflict for 'strings': mosaic.toml requires 0.1.0, but logger@1.2.0 requires 0.2.0"
    );
    assert!(!project.manifest().contains("logger"));
    Ok(())
}

/// A dependency cycle is reported with the full path
#[tokio::test]
async fn test_cycle_is_rejected() {
    let project = TestProject::new();
    project.registry.publish("ping", "1.0.0", &[("pong", "1.0.0")]);
    project.registry.publish("pong", "1.0.0", &[("ping", "1.0.0")]);

    let err = project.installer().install(Some(&spec("ping@1.0.0"))).await.unwrap_err();
    assert_eq!(err.to_string(), "Circular dependency detected: ping@1.0.0 -> pong@1.0.0 -> ping@1.0.0");
    assert!(!project.fixture.lockfile_path().exists());
}

/// A registry failure leaves the project untouched and the next run succeeds
#[tokio::test]
async fn test_network_failure_then_retry() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    let place = project.project();

    project.registry.fail_next(1);
    assert!(project.installer().install(Some(&spec("logger@1.2.0"))).await.is_err());
    assert_eq!(project.project(), place);
    assert!(!project.fixture.lockfile_path().exists());

    let report = project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    assert_eq!(report.injected, vec!["logger@1.2.0"]);
    Ok(())
}

/// Scoped packages are injected under their leaf name
#[tokio::test]
async fn test_scoped_package_uses_leaf_name() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("acme/net", "0.4.1", &[]);

    project.installer().install(Some(&spec("acme/net@0.4.1"))).await?;
    let text = project.project();
    assert!(text.contains("mosaic-package=\"acme/net\""));
    assert!(text.contains("<string name=\"Name\">net</string>"));
    assert!(project.manifest().contains("\"acme/net\" = \"0.4.1\""));
    Ok(())
}

/// A lockfile that cannot be read stops the operation and is left as it is
#[tokio::test]
async fn test_unreadable_lockfile_is_not_overwritten() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let place = project.project();

    project.fixture.write("mosaic.lock", "this is [not toml");
    let err = installer.sync().await.unwrap_err();
    assert!(
        matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::LockfileParseError { .. })),
        "{err:?}"
    );
    assert_eq!(project.lockfile(), "this is [not toml");

    // A missing lockfile is regenerated, while one from a newer Mosaic is kept
    std::fs::remove_file(project.fixture.lockfile_path())?;
    assert!(!installer.sync().await?.lockfile_reused);
    let newer = project.lockfile().replacen("version = 1\n", "version = 99\n", 1);
    assert_ne!(newer, project.lockfile());
    project.fixture.write("mosaic.lock", &newer);
    let err = installer.sync().await.unwrap_err();
    assert!(err.to_string().contains("newer than supported"), "{err}");
    assert_eq!(project.lockfile(), newer);
    assert_eq!(project.project(), place);
    Ok(())
}

/// Two projects installing the same package at once into one shared cache
/// download its blob only once
#[tokio::test]
async fn test_shared_cache_downloads_once() -> Result<()> {
    let first = TestProject::new();
    let second = first.sibling();
    first.registry.publish("logger", "1.2.0", &[]);
    first.registry.delay_blobs(Duration::from_millis(200));
    let cache = first.fixture.cache_dir();

    let a = first.installer_with_cache(&cache);
    let b = second.installer_with_cache(&cache);
    let logger = spec("logger@1.2.0");
    let (ra, rb) = tokio::join!(a.install(Some(&logger)), b.install(Some(&logger)));
    ra?;
    rb?;

    assert_eq!(first.registry.blob_requests(), 1);
    assert!(first.project().contains("mosaic-package=\"logger\""));
    assert!(second.project().contains("mosaic-package=\"logger\""));
    Ok(())
}

/// Update asks the registry again even when the lockfile is fresh, and picks
/// up a package whose content was republished under the same version
#[tokio::test]
async fn test_update_refreshes_republished_package() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let lockfile = project.lockfile();

    let before = project.registry.metadata_requests();
    let report = installer.update().await?;
    assert!(report.is_noop(), "{report:?}");
    assert!(!report.lockfile_reused);
    assert!(project.registry.metadata_requests() > before);
    assert_eq!(project.lockfile(), lockfile);

    let archive = mosaic_cli::test_utils::build_archive(&[("init.lua", "return { fixed = true }\n")]);
    let republished = project.registry.publish_archive("logger", "1.2.0", &[], archive);

    // Sync trusts the lockfile and keeps the old content
    assert!(installer.sync().await?.is_noop());
    assert!(!project.project().contains("fixed = true"));

    let report = installer.update().await?;
    assert_eq!(report.injected, vec!["logger@1.2.0".to_string()]);
    assert_eq!(report.removed, vec!["logger@1.2.0".to_string()]);
    assert!(project.project().contains("return { fixed = true }"));
    assert!(project.lockfile().contains(&republished.to_string()));
    Ok(())
}
