/// End-to-end tests of the resolve, lock and plan pipeline
///
/// Every test works against an in-memory index and a mock environment, so
/// nothing touches the network or a real interpreter.

use std::sync::Arc;

use pyx_pm::cache::ArtifactCache;
use pyx_pm::env::MockEnvironment;
use pyx_pm::installer::{ExecutionSummary, Executor, Installer, RecordingBackend};
use pyx_pm::package::{Dependency, Link, PackageSource, SourceKind};
use pyx_pm::repository::{ArrayRepository, InstalledRepository, RepositoryPool};
use pyx_pm::{Locker, Operation, Package, ProjectManifest};
use tempfile::TempDir;

fn pyproject(dependencies: &str) -> String {
    format!(
        r#"
[tool.pyx]
name = "app"
version = "0.1.0"
description = "Demo application"

[tool.pyx.dependencies]
python = "^3.8"
{}
"#,
        dependencies
    )
}

fn write_project(temp: &TempDir, dependencies: &str) -> ProjectManifest {
    std::fs::write(temp.path().join("pyproject.toml"), pyproject(dependencies)).unwrap();
    ProjectManifest::load(temp.path()).unwrap()
}

fn installer(temp: &TempDir, manifest: ProjectManifest, index: &ArrayRepository, installed: Vec<Package>) -> Installer {
    let _ = env_logger::builder().is_test(true).try_init();

    let env = Arc::new(MockEnvironment::new(temp.path().join("venv")));
    let pool = Arc::new(RepositoryPool::new().with_repository(Arc::new(index.clone())));
    let executor = Executor::new(
        env.clone(),
        Arc::new(index.clone()),
        Arc::new(RecordingBackend::new()),
        ArtifactCache::new(temp.path().join("cache")),
    )
    .with_interrupt_handling(false);

    Installer::new(manifest, env, pool, executor)
        .with_progress(false)
        .with_installed_repository(InstalledRepository::from_packages(installed))
}

fn actionable(operations: &[Operation]) -> Vec<String> {
    operations
        .iter()
        .filter(|op| !op.is_skipped())
        .map(|op| op.to_string())
        .collect()
}

/// Index entry whose only artifact is a local wheel
fn with_wheel(temp: &TempDir, index: ArrayRepository, name: &str, version: &str) -> ArrayRepository {
    let dir = temp.path().join("wheels");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}-{}-py3-none-any.whl", name, version));
    std::fs::write(&path, format!("{}-{}", name, version)).unwrap();

    index
        .with_links(name, version, vec![Link::from_path(&path)])
        .unwrap()
}

async fn lock(temp: &TempDir, manifest: ProjectManifest, index: &ArrayRepository) {
    let mut installer = installer(temp, manifest, index, vec![]).with_lock_only(true);
    assert_eq!(installer.run().await.unwrap(), 0);
    assert!(installer.locker().is_fresh().unwrap());
}

#[tokio::test]
async fn test_widened_constraint_scenario() {
    let temp = TempDir::new().unwrap();
    let index = ArrayRepository::new("index").with_package(Package::parse("a", "1.0.0").unwrap());
    lock(&temp, write_project(&temp, r#"a = "1.0.0""#), &index).await;

    let widened = write_project(&temp, r#"a = ">=1.0,<2.0""#);
    let index = index.with_package(Package::parse("a", "1.5.0").unwrap());
    let a_installed = vec![Package::parse("a", "1.0.0").unwrap()];

    // An update resolves to the newer release
    let operations = installer(&temp, widened.clone(), &index, a_installed.clone())
        .with_update(true)
        .with_dry_run(true)
        .plan()
        .await
        .unwrap();
    assert_eq!(actionable(&operations), vec!["Updating a (1.0.0 -> 1.5.0)"]);

    // A plain install keeps the locked version, which is already there
    let operations = installer(&temp, widened.clone(), &index, a_installed)
        .plan()
        .await
        .unwrap();
    assert!(ExecutionSummary::from_operations(&operations).is_empty());
    assert!(operations.iter().all(|op| op.skip_reason() == Some("Already installed")));

    // Without it the locked version is installed
    let operations = installer(&temp, widened, &index, vec![]).plan().await.unwrap();
    assert_eq!(actionable(&operations), vec!["Installing a (1.0.0)"]);
}

#[tokio::test]
async fn test_second_plan_is_empty() {
    let temp = TempDir::new().unwrap();
    let index = ArrayRepository::new("index")
        .with_package(Package::parse("a", "1.2.0").unwrap().with_dependency(Dependency::new("b", ">=2").unwrap()))
        .with_package(Package::parse("b", "2.0.0").unwrap());
    let index = with_wheel(&temp, index, "a", "1.2.0");
    let index = with_wheel(&temp, index, "b", "2.0.0");
    let manifest = write_project(&temp, r#"a = "^1.0""#);

    let mut first = installer(&temp, manifest.clone(), &index, vec![]);
    assert_eq!(first.run().await.unwrap(), 0);
    let report = first.executor().report();
    assert_eq!(report.installs, 2);
    assert!(report.succeeded());

    let installed = vec![Package::parse("a", "1.2.0").unwrap(), Package::parse("b", "2.0.0").unwrap()];
    let operations = installer(&temp, manifest, &index, installed).plan().await.unwrap();
    assert!(actionable(&operations).is_empty());
}

#[tokio::test]
async fn test_partial_update_scope() {
    let temp = TempDir::new().unwrap();
    let index = ArrayRepository::new("index")
        .with_package(Package::parse("a", "1.0.0").unwrap())
        .with_package(Package::parse("b", "1.0.0").unwrap());
    let manifest = write_project(&temp, "a = \"^1.0\"\nb = \"^1.0\"");
    lock(&temp, manifest.clone(), &index).await;

    let index = index
        .with_package(Package::parse("a", "1.1.0").unwrap())
        .with_package(Package::parse("b", "1.1.0").unwrap());

    let mut partial = installer(&temp, manifest.clone(), &index, vec![])
        .with_update(true)
        .with_whitelist(["a"])
        .with_lock_only(true);
    partial.run().await.unwrap();

    let locked = partial.locker().locked_repository(true).unwrap();
    assert_eq!(locked.package("a").unwrap().version.to_string(), "1.1.0");
    assert_eq!(locked.package("b").unwrap().version.to_string(), "1.0.0");

    let mut full = installer(&temp, manifest, &index, vec![])
        .with_update(true)
        .with_lock_only(true);
    full.run().await.unwrap();

    let locked = full.locker().locked_repository(true).unwrap();
    assert_eq!(locked.package("b").unwrap().version.to_string(), "1.1.0");
}

#[tokio::test]
async fn test_lock_round_trip() {
    let temp = TempDir::new().unwrap();
    let internal = PackageSource::legacy("internal", "https://pypi.internal.example.com/simple/");
    let a = Package::parse("a", "1.2.0")
        .unwrap()
        .with_description("Package a")
        .with_dependency(Dependency::new("b", ">=2.0").unwrap())
        .with_extra("speed", vec![Dependency::new("c", ">=1.0").unwrap()])
        .with_file("a-1.2.0-py3-none-any.whl", "sha256:aaaa")
        .with_source(internal.clone());
    let index = ArrayRepository::new("index")
        .with_package(a.clone())
        .with_package(Package::parse("b", "2.0.0").unwrap())
        .with_package(Package::parse("c", "1.0.0").unwrap());

    let manifest = write_project(&temp, r#"a = { version = "^1.0", extras = ["speed"] }"#);
    lock(&temp, manifest.clone(), &index).await;

    let locker = Locker::new(manifest.lock_path(), manifest.content_hash());
    let locked = locker.locked_repository(true).unwrap();
    assert_eq!(locked.len(), 3);

    let reloaded = locked.package("a").unwrap();
    assert_eq!(reloaded.version, a.version);
    assert_eq!(reloaded.description, "Package a");
    assert_eq!(
        reloaded.requires().map(|d| d.to_requirement_string()).collect::<Vec<_>>(),
        a.requires().map(|d| d.to_requirement_string()).collect::<Vec<_>>()
    );
    assert_eq!(
        reloaded.extras.keys().collect::<Vec<_>>(),
        a.extras.keys().collect::<Vec<_>>()
    );
    let source = reloaded.source.as_ref().unwrap();
    assert_eq!(source.kind, SourceKind::Legacy);
    assert_eq!(source.url, internal.url);
    assert!(reloaded.known_hashes().contains("sha256:aaaa"));
}

#[test]
fn test_fingerprint_sensitivity() {
    let temp = TempDir::new().unwrap();

    let base = write_project(&temp, r#"a = "^1.0""#).content_hash().to_string();
    let widened = write_project(&temp, r#"a = ">=1.0,<3.0""#).content_hash().to_string();
    assert_ne!(base, widened);

    let renamed = pyproject(r#"a = "^1.0""#).replace("Demo application", "Something else");
    let manifest = ProjectManifest::parse(&renamed, temp.path()).unwrap();
    assert_eq!(manifest.content_hash(), base);
}
