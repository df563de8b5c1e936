use anyhow::Result;
use mosaic_cli::core::MosaicError;
use mosaic_cli::project::ProjectTree;

use crate::common::{TestProject, spec};

/// Drop every injected module so the next sync has to read blobs again.
fn strip_modules(project: &TestProject) -> Result<()> {
    let mut tree = ProjectTree::load(&project.fixture.project_path())?;
    for owned in tree.owned_nodes() {
        tree.remove_owned(&owned.provenance);
    }
    std::fs::write(project.fixture.project_path(), tree.serialize())?;
    Ok(())
}

/// Bytes that do not hash to the recorded checksum are rejected and never cached
#[tokio::test]
async fn test_corrupt_download_aborts_install() {
    let project = TestProject::new();
    let hash = project.registry.publish("logger", "1.2.0", &[]);
    project.registry.corrupt_blob(&hash);
    let place = project.project();

    let installer = project.installer();
    let err = installer.install(Some(&spec("logger@1.2.0"))).await.unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::Integrity { package, expected, actual }) => {
            assert_eq!(package, "logger@1.2.0");
            assert_eq!(expected, &hash.to_string());
            assert_ne!(actual, expected);
        }
        other => panic!("expected an integrity error, got {other:?}"),
    }

    assert!(!installer.store().blob_path(&hash).exists());
    assert!(!project.fixture.lockfile_path().exists());
    assert!(!project.manifest().contains("logger"));
    assert_eq!(project.project(), place);
}

/// A cache entry with one flipped byte is detected and downloaded again
#[tokio::test]
async fn test_corrupt_cache_entry_heals() -> Result<()> {
    let project = TestProject::new();
    let hash = project.registry.publish("logger", "1.2.0", &[]);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    let installed = project.project();

    let installer = project.installer();
    let blob_path = installer.store().blob_path(&hash);
    let mut bytes = std::fs::read(&blob_path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&blob_path, &bytes)?;
    strip_modules(&project)?;

    let blobs_before = project.registry.blob_requests();
    let report = installer.sync().await?;
    assert_eq!(report.downloads, 1);
    assert_eq!(project.registry.blob_requests(), blobs_before + 1);
    assert_eq!(report.injected, vec!["logger@1.2.0"]);
    assert_eq!(project.project(), installed);

    let healed = std::fs::read(&blob_path)?;
    assert_eq!(mosaic_cli::models::ContentHash::of(&healed), hash);
    Ok(())
}

/// A corrupt cache entry with a corrupt registry copy fails instead of
/// injecting unverified code
#[tokio::test]
async fn test_corrupt_cache_and_registry_fails() -> Result<()> {
    let project = TestProject::new();
    let hash = project.registry.publish("logger", "1.2.0", &[]);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;

    let installer = project.installer();
    std::fs::write(installer.store().blob_path(&hash), b"not a zip archive")?;
    strip_modules(&project)?;
    let stripped = project.project();
    project.registry.corrupt_blob(&hash);

    let err = installer.sync().await.unwrap_err();
    assert!(
        matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::Integrity { .. })),
        "{err:?}"
    );
    assert_eq!(project.project(), stripped);

    project.registry.repair_blob(&hash);
    let report = installer.sync().await?;
    assert_eq!(report.injected, vec!["logger@1.2.0"]);
    Ok(())
}

/// A verified archive without an entry module is rejected before anything is written
#[tokio::test]
async fn test_archive_without_module_is_rejected() {
    let project = TestProject::new();
    let archive = mosaic_cli::test_utils::build_archive(&[("README.md", "# docs only\n")]);
    project.registry.publish_archive("docs", "1.0.0", &[], archive);

    let err = project.installer().install(Some(&spec("docs@1.0.0"))).await.unwrap_err();
    assert!(
        matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::InvalidPackage { .. })),
        "{err:?}"
    );
    assert!(!project.fixture.lockfile_path().exists());
}
