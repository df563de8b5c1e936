use anyhow::Result;
use mosaic_cli::core::MosaicError;
use mosaic_cli::project::{NodeOrigin, ProjectTree};

use crate::common::{TestProject, spec};

/// A hand-written ModuleScript with the same name as a package
const PLACE_WITH_OWN_LOGGER: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<game>
  <Item class="Game">
    <Item class="ScriptService">
      <Item class="ModuleScript">
        <Properties>
          <string name="Source">-- my own logger
return { log = print }</string>
          <string name="Name">logger</string>
        </Properties>
      </Item>
    </Item>
  </Item>
</game>
"#;

const PLACE_WITHOUT_SCRIPTS: &str = "<game>\n  <Item class=\"Game\">\n    <Item class=\"Lighting\" />\n  </Item>\n</game>\n";

/// Hand-written nodes stay byte-identical through install and remove
#[tokio::test]
async fn test_hand_written_module_is_never_touched() -> Result<()> {
    let project = TestProject::with_place(PLACE_WITH_OWN_LOGGER);
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();

    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let tree = ProjectTree::load(&project.fixture.project_path())?;
    let foreign = tree.foreign_nodes();
    assert_eq!(foreign.len(), 1);
    assert_eq!(tree.origin(foreign[0]), &NodeOrigin::Foreign);
    let own = tree.node_text(foreign[0]);
    assert!(own.contains("-- my own logger"));
    assert!(PLACE_WITH_OWN_LOGGER.contains(own.trim_start()));
    assert_eq!(tree.owned_nodes().len(), 1);

    installer.remove("logger").await?;
    assert_eq!(project.project(), PLACE_WITH_OWN_LOGGER);
    Ok(())
}

/// A place without a ScriptService gets one, and loses it again when the
/// last package is removed
#[tokio::test]
async fn test_generated_container_comes_and_goes() -> Result<()> {
    let project = TestProject::with_place(PLACE_WITHOUT_SCRIPTS);
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();

    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let text = project.project();
    assert!(text.contains("<Item class=\"ScriptService\" mosaic-generated=\"true\">"), "{text}");
    assert!(text.contains("    <Item class=\"Lighting\" />\n"));

    installer.remove("logger").await?;
    assert_eq!(project.project(), PLACE_WITHOUT_SCRIPTS);
    Ok(())
}

/// Windows line endings are kept, including in injected nodes
#[tokio::test]
async fn test_crlf_project_file() -> Result<()> {
    let place = mosaic_cli::test_utils::SAMPLE_PLACE.replace('\n', "\r\n");
    let project = TestProject::with_place(&place);
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();

    installer.install(Some(&spec("logger@1.2.0"))).await?;
    let text = project.project();
    assert!(text.contains("mosaic-package=\"logger\""));
    let bare_newlines = text.matches('\n').count() - text.matches("\r\n").count();
    assert_eq!(bare_newlines, module_source_newlines("logger", "1.2.0"));

    installer.remove("logger").await?;
    assert_eq!(project.project(), place);
    Ok(())
}

/// Newlines inside the module source itself, which stay as published
fn module_source_newlines(name: &str, version: &str) -> usize {
    mosaic_cli::test_utils::module_source(name, version).matches('\n').count()
}

/// A project file that is not well-formed aborts before anything is written
#[tokio::test]
async fn test_malformed_project_file_aborts() {
    let project = TestProject::with_place("<game>\n  <Item class=\"Game\">\n</game>\n");
    project.registry.publish("logger", "1.2.0", &[]);
    let manifest = project.manifest();

    let err = project.installer().install(Some(&spec("logger@1.2.0"))).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::XmlParse { .. })), "{err:?}");
    assert_eq!(project.manifest(), manifest);
    assert!(!project.fixture.lockfile_path().exists());
    assert_eq!(project.registry.requests(), 0);
}

/// Without a project file install fails, while list still reports the lockfile
#[tokio::test]
async fn test_missing_project_file() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    let installer = project.installer();
    installer.install(Some(&spec("logger@1.2.0"))).await?;

    std::fs::remove_file(project.fixture.project_path())?;
    let entries = installer.list()?;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].installed);

    let err = installer.sync().await.unwrap_err();
    assert!(
        matches!(err.downcast_ref::<MosaicError>(), Some(MosaicError::ProjectFileNotFound { .. })),
        "{err:?}"
    );
    Ok(())
}

/// An explicit project file wins over the first `.poly` in the directory
#[tokio::test]
async fn test_explicit_project_file() -> Result<()> {
    let project = TestProject::new();
    project.registry.publish("logger", "1.2.0", &[]);
    project.fixture.write("arena.poly", PLACE_WITHOUT_SCRIPTS);

    let installer = project.installer().with_project_file(Some("place.poly".into()));
    installer.install(Some(&spec("logger@1.2.0"))).await?;

    assert!(project.project().contains("mosaic-package=\"logger\""));
    assert_eq!(project.fixture.read("arena.poly"), PLACE_WITHOUT_SCRIPTS);
    Ok(())
}

/// A self-closing game item is written back self-closing once the last
/// package is gone, also when remove runs in a later process
#[tokio::test]
async fn test_self_closing_game_item_survives_install_and_remove() -> Result<()> {
    let place = "<game>\n  <Item class=\"Game\"/>\n</game>\n";
    let project = TestProject::with_place(place);
    project.registry.publish("logger", "1.2.0", &[]);

    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    let text = project.project();
    assert!(text.contains("<Item class=\"Game\">\n    <Item class=\"ScriptService\""), "{text}");

    // A fresh installer reads the file back from disk
    project.installer().remove("logger").await?;
    assert_eq!(project.project(), place);
    Ok(())
}

/// The same holds for a self-closing root element
#[tokio::test]
async fn test_self_closing_root_survives_install_and_remove() -> Result<()> {
    let place = "<game/>\n";
    let project = TestProject::with_place(place);
    project.registry.publish("logger", "1.2.0", &[]);
    project.registry.publish("signal", "0.3.0", &[]);

    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    project.installer().install(Some(&spec("signal@0.3.0"))).await?;
    assert_eq!(ProjectTree::load(&project.fixture.project_path())?.owned_nodes().len(), 2);

    project.installer().remove("logger").await?;
    assert_ne!(project.project(), place);
    project.installer().remove("signal").await?;
    assert_eq!(project.project(), place);
    Ok(())
}
