use anyhow::Result;
use assert_cmd::Command;
use mosaic_cli::models::ContentHash;
use mosaic_cli::test_utils::{ProjectFixture, SAMPLE_PLACE, build_archive};
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `mosaic` run in `dir` with an isolated config and cache.
fn mosaic(dir: &Path, cache: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.current_dir(dir)
        .env("MOSAIC_CONFIG", cache.join("no-such-config.toml"))
        .env("MOSAIC_CACHE_DIR", cache)
        .env("NO_COLOR", "1")
        .env_remove("MOSAIC_REGISTRY_URL")
        .env_remove("MOSAIC_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

/// Test creating a manifest with init
#[test]
fn test_init_creates_manifest() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("space-race");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("place.poly"), SAMPLE_PLACE).unwrap();

    mosaic(&dir, &temp.path().join("cache"))
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"))
        .stdout(predicate::str::contains("space-race"));

    let manifest = std::fs::read_to_string(dir.join("mosaic.toml")).unwrap();
    assert!(manifest.contains("name = \"space-race\""));
    assert!(manifest.contains("[dependencies]"));

    // A second init refuses to overwrite
    mosaic(&dir, &temp.path().join("cache"))
        .arg("init")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("already exists"));
}

/// Test list before anything is installed
#[test]
fn test_list_without_lockfile() {
    let project = ProjectFixture::new();
    mosaic(project.dir(), &project.cache_dir())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No packages locked"));
}

/// Test commands outside a project
#[test]
fn test_install_without_manifest_fails() {
    let temp = TempDir::new().unwrap();
    mosaic(temp.path(), &temp.path().join("cache"))
        .arg("install")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("mosaic.toml not found"));
}

/// Test removing a package that is not declared
#[test]
fn test_remove_undeclared_fails() {
    let project = ProjectFixture::new();
    mosaic(project.dir(), &project.cache_dir())
        .args(["remove", "logger"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("'logger' is not declared in mosaic.toml"));
}

/// Test that version ranges are rejected before any network access
#[test]
fn test_range_constraint_is_rejected() {
    let project = ProjectFixture::new();
    let manifest = project.read("mosaic.toml");
    mosaic(project.dir(), &project.cache_dir())
        .args(["install", "logger@^1.2.0", "--registry-url", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("range constraints are not supported"));
    assert_eq!(project.read("mosaic.toml"), manifest);
}

/// Test syncing an empty manifest
#[test]
fn test_install_with_no_dependencies() {
    let project = ProjectFixture::new();
    mosaic(project.dir(), &project.cache_dir())
        .args(["install", "--registry-url", "http://127.0.0.1:9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 packages locked"));

    assert!(project.lockfile_path().exists());
    assert_eq!(project.read("place.poly"), SAMPLE_PLACE);
}

/// Test verbose and quiet together
#[test]
fn test_verbose_and_quiet_conflict() {
    let project = ProjectFixture::new();
    mosaic(project.dir(), &project.cache_dir())
        .args(["--verbose", "--quiet", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

/// Test the full install, list, update and remove cycle against an HTTP registry
#[tokio::test]
async fn test_install_list_remove_against_http_registry() -> Result<()> {
    let server = MockServer::start().await;
    let archive = build_archive(&[("init.lua", "return { log = print }\n")]);
    let hash = ContentHash::of(&archive);

    Mock::given(method("GET"))
        .and(path("/packages/logger/versions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "version": "1.2.0",
                "lua_source_url": format!("/packages/blobs/{}", hash.hex()),
                "dependencies": {}
            }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/packages/blobs/{}", hash.hex())))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let project = ProjectFixture::new();
    let dir = project.dir().to_path_buf();
    let cache = project.cache_dir();
    let url = server.uri();

    let output = tokio::task::spawn_blocking(move || {
        mosaic(&dir, &cache)
            .args(["--registry-url", url.as_str(), "install", "logger@1.2.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("+ logger@1.2.0"));
        mosaic(&dir, &cache)
            .args(["--registry-url", url.as_str(), "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("logger@1.2.0"));
        // Fresh lockfile and warm cache: no second blob download
        mosaic(&dir, &cache)
            .args(["--registry-url", url.as_str(), "install"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Up to date"));
        // Update asks for metadata again but the cached blob still matches
        mosaic(&dir, &cache)
            .args(["--registry-url", url.as_str(), "update"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Up to date"));
        mosaic(&dir, &cache)
            .args(["--registry-url", url.as_str(), "remove", "logger"])
            .assert()
            .success()
            .stdout(predicate::str::contains("- logger@1.2.0"));
    })
    .await;
    output?;

    assert_eq!(project.read("place.poly"), SAMPLE_PLACE);
    assert!(!project.read("mosaic.toml").contains("logger"));
    server.verify().await;
    Ok(())
}
