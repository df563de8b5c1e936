use anyhow::Result;

use crate::common::{TestProject, later_clock, spec};

fn publish_graph(project: &TestProject) {
    project.registry.publish("strings", "0.2.0", &[]);
    project.registry.publish("tables", "0.3.0", &[]);
    project.registry.publish("logger", "1.2.0", &[("strings", "0.2.0"), ("tables", "0.3.0")]);
    project.registry.publish("acme/net", "0.4.1", &[("tables", "0.3.0")]);
}

/// Two independent projects with the same inputs produce identical lockfiles
/// and identical project files
#[tokio::test]
async fn test_lockfile_is_byte_identical_across_projects() -> Result<()> {
    let first = TestProject::new();
    let second = TestProject::new();
    publish_graph(&first);
    publish_graph(&second);

    first.installer().install(Some(&spec("logger@1.2.0"))).await?;
    first.installer().install(Some(&spec("acme/net@0.4.1"))).await?;

    // Reverse declaration order
    second.installer().install(Some(&spec("acme/net@0.4.1"))).await?;
    second.installer().install(Some(&spec("logger@1.2.0"))).await?;

    assert_eq!(first.lockfile(), second.lockfile());
    Ok(())
}

/// An equivalent pin spelling at a later time leaves the lockfile untouched
#[tokio::test]
async fn test_equivalent_pin_keeps_lockfile() -> Result<()> {
    let project = TestProject::new();
    publish_graph(&project);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    let lockfile = project.lockfile();
    assert!(lockfile.contains("generated_at = \"2026-03-01T12:00:00Z\""));

    let manifest = project.manifest().replace("logger = \"1.2.0\"", "logger = \"=1.2.0\"");
    project.fixture.write("mosaic.toml", &manifest);

    let report = project.installer_with_clock(later_clock).sync().await?;
    assert_eq!(project.lockfile(), lockfile);
    assert!(report.is_noop(), "{report:?}");
    Ok(())
}

/// A changed graph records the new timestamp
#[tokio::test]
async fn test_changed_graph_updates_timestamp() -> Result<()> {
    let project = TestProject::new();
    publish_graph(&project);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;

    project.installer_with_clock(later_clock).install(Some(&spec("acme/net@0.4.1"))).await?;
    assert!(project.lockfile().contains("generated_at = \"2026-03-02T08:30:00Z\""));
    Ok(())
}

/// Packages are listed sorted by name with sorted dependency lists
#[tokio::test]
async fn test_lockfile_is_sorted() -> Result<()> {
    let project = TestProject::new();
    publish_graph(&project);
    project.installer().install(Some(&spec("logger@1.2.0"))).await?;
    project.installer().install(Some(&spec("acme/net@0.4.1"))).await?;

    let lockfile = project.lockfile();
    let names: Vec<&str> = lockfile
        .lines()
        .filter_map(|line| line.strip_prefix("name = \""))
        .map(|rest| rest.trim_end_matches('"'))
        .collect();
    assert_eq!(names, vec!["acme/net", "logger", "strings", "tables"]);
    assert!(lockfile.contains("dependencies = [\"strings@0.2.0\", \"tables@0.3.0\"]"));
    Ok(())
}
