use anyhow::Result;
use mosaic_cli::core::MosaicError;
use mosaic_cli::test_utils::SAMPLE_PLACE;

use crate::common::{TestProject, spec};

/// Install followed by remove restores the project file byte for byte
#[tokio::test]
async fn test_install_then_remove_restores_project_file() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    let installer = project.installer();
    let manifest = project.manifest();

    installer.install(Some(&spec("logger@1.2.0"))).await?;
    assert_ne!(project.project(), SAMPLE_PLACE);

    let report = installer.remove("logger").await?;
    let mut removed = report.removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["logger@1.2.0", "strings@0.2.0"]);
    assert!(report.injected.is_empty());

    assert_eq!(project.project(), SAMPLE_PLACE);
    assert_eq!(project.manifest(), manifest);
    assert!(!project.lockfile().contains("[[package]]"));
    Ok(())
}

/// Removing one of two dependents keeps the shared dependency
#[tokio::test]
async fn test_shared_dependency_survives_removal() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    project.registry.publish("net", "0.4.1", &[("strings", "0.2.0")]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;
    installer.install(Some(&spec("net@0.4.1"))).await?;

    let report = installer.remove("logger").await?;
    assert_eq!(report.removed, vec!["logger@1.2.0"]);

    let entries = installer.list()?;
    let names: Vec<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec!["net", "strings"]);
    assert!(entries.iter().all(|entry| entry.installed));

    let report = installer.remove("net").await?;
    let mut removed = report.removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["net@0.4.1", "strings@0.2.0"]);
    assert_eq!(project.project(), SAMPLE_PLACE);
    Ok(())
}

/// A transitive-only package cannot be removed directly
#[tokio::test]
async fn test_remove_transitive_dependency_is_rejected() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let before = (project.manifest(), project.lockfile(), project.project());

    let err = installer.remove("strings").await.unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::DependencyNotDeclared { name, required_by, .. }) => {
            assert_eq!(name, "strings");
            assert_eq!(required_by, &vec!["logger@1.2.0".to_string()]);
        }
        other => panic!("expected DependencyNotDeclared, got {other:?}"),
    }
    assert_eq!((project.manifest(), project.lockfile(), project.project()), before);
    Ok(())
}

/// Removing a name nobody declared suggests the closest declared one
#[tokio::test]
async fn test_remove_typo_suggests_declared_name() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;

    let err = installer.remove("loggr").await.unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::DependencyNotDeclared { required_by, did_you_mean, .. }) => {
            assert!(required_by.is_empty());
            assert_eq!(did_you_mean.as_deref(), Some("logger"));
        }
        other => panic!("expected DependencyNotDeclared, got {other:?}"),
    }

    let err = installer.remove("websockets").await.unwrap_err();
    match err.downcast_ref::<MosaicError>() {
        Some(MosaicError::DependencyNotDeclared { did_you_mean, .. }) => assert!(did_you_mean.is_none()),
        other => panic!("expected DependencyNotDeclared, got {other:?}"),
    }
    Ok(())
}

/// Removal resolves from the lockfile snapshot without querying the registry
/// for packages that stay
#[tokio::test]
async fn test_remove_reuses_locked_metadata() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0")]);
    project.registry.publish("net", "0.4.1", &[]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;
    installer.install(Some(&spec("net@0.4.1"))).await?;

    let requests = project.registry.requests();
    installer.remove("net").await?;
    assert_eq!(project.registry.requests(), requests);
    Ok(())
}
