use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use super::executor::{ExecutionSummary, Executor};
use crate::env::Environment;
use crate::locker::Locker;
use crate::package::Package;
use crate::progress::ProgressReporter;
use crate::project::ProjectManifest;
use crate::repository::{InstalledRepository, RepositoryPool};
use crate::solver::{Operation, OperationKind, Solver, SolverResult};
use crate::util::canonicalize_name;
use crate::PyxError;

/// Plans and applies the dependencies of a project to an environment
pub struct Installer {
    manifest: ProjectManifest,
    locker: Locker,
    env: Arc<dyn Environment>,
    pool: Arc<RepositoryPool>,
    executor: Executor,
    installed: Option<InstalledRepository>,
    update: bool,
    lock_only: bool,
    synchronize: bool,
    dry_run: bool,
    verbose: bool,
    show_progress: bool,
    whitelist: BTreeSet<String>,
    groups: Option<BTreeSet<String>>,
    extras: BTreeSet<String>,
}

impl Installer {
    pub fn new(manifest: ProjectManifest, env: Arc<dyn Environment>, pool: Arc<RepositoryPool>, executor: Executor) -> Self {
        let locker = Locker::new(manifest.lock_path(), manifest.content_hash());
        Self {
            manifest,
            locker,
            env,
            pool,
            executor,
            installed: None,
            update: false,
            lock_only: false,
            synchronize: false,
            dry_run: false,
            verbose: false,
            show_progress: true,
            whitelist: BTreeSet::new(),
            groups: None,
            extras: BTreeSet::new(),
        }
    }

    /// Re-resolve instead of installing from the lock file
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    /// Restrict an update to these packages
    pub fn with_whitelist<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.whitelist = packages.into_iter().map(|p| canonicalize_name(p.as_ref())).collect();
        self
    }

    /// Write the lock file and stop before touching the environment
    pub fn with_lock_only(mut self, lock_only: bool) -> Self {
        self.lock_only = lock_only;
        self
    }

    /// Remove installed packages the lock file does not mention
    pub fn with_synchronize(mut self, synchronize: bool) -> Self {
        self.synchronize = synchronize;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self.executor = self.executor.with_dry_run(dry_run);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self.executor = self.executor.with_verbose(verbose);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Dependency groups to install; defaults to every non-optional group
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.groups = Some(groups.into_iter().map(|g| canonicalize_name(g.as_ref())).collect());
        self
    }

    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extras = extras.into_iter().map(|e| canonicalize_name(e.as_ref())).collect();
        self
    }

    /// Use this set as the installed packages instead of scanning the environment
    pub fn with_installed_repository(mut self, installed: InstalledRepository) -> Self {
        self.installed = Some(installed);
        self
    }

    pub fn locker(&self) -> &Locker {
        &self.locker
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Plan, write the lock file when needed, and execute
    pub async fn run(&mut self) -> Result<i32> {
        if self.dry_run {
            println!("{} Running in dry-run mode", style("Info:").cyan());
        }

        let operations = self.plan().await?;

        if self.lock_only {
            return Ok(0);
        }

        let summary = ExecutionSummary::from_operations(&operations);
        println!("{}", style(summary.to_string()).bold());

        let (sender, receiver) = ProgressReporter::channel();
        let reporter = tokio::spawn(ProgressReporter::new(self.show_progress).run(receiver));

        self.executor.set_progress(Some(sender));
        let exit_code = self.executor.execute(&operations).await;
        self.executor.set_progress(None);

        if let Err(e) = reporter.await {
            log::debug!("Progress reporter stopped: {}", e);
        }

        let report = self.executor.report();
        if exit_code == 0 {
            if !summary.is_empty() {
                println!("{} Installed the project dependencies", style("Success:").green().bold());
            }
            return Ok(0);
        }

        for error in &report.errors {
            eprintln!("{} {}", style("Error:").red().bold(), error);
        }
        if report.interrupted {
            eprintln!("{} Installation was cancelled", style("Warning:").yellow());
        }
        eprintln!(
            "{} installs, {} updates, {} removals, {} skipped, {} failed, {} cancelled",
            report.installs, report.updates, report.removals, report.skipped, report.failed, report.cancelled
        );

        Ok(exit_code)
    }

    /// Resolve, filter and lock; returns the operations to execute
    pub async fn plan(&self) -> Result<Vec<Operation>> {
        let locked = self.locker.is_locked();
        let update = self.update || !locked;

        if update {
            println!("{} Updating dependencies", style("pyx").green().bold());
        } else {
            println!("{} Installing dependencies from lock file", style("pyx").green().bold());
            if !self.locker.is_fresh()? {
                println!("{} {}", style("Warning:").yellow(), PyxError::LockStale);
            }
        }

        self.validate_extras(update)?;

        let installed: Vec<Package> = match &self.installed {
            Some(repository) => repository.packages().to_vec(),
            None => InstalledRepository::load(self.env.as_ref())
                .context("Failed to read the installed packages")?
                .packages()
                .to_vec(),
        };

        let mut request = self.manifest.request()?;
        let locked_repository = if locked {
            Some(
                self.locker
                    .locked_repository(true)
                    .with_context(|| format!("Failed to read {}", self.locker.path().display()))?,
            )
        } else {
            None
        };
        if let Some(repository) = &locked_repository {
            for package in repository.packages() {
                request.lock(package.clone());
            }
        }
        if update {
            if self.whitelist.is_empty() {
                request.update_all();
            } else {
                request.update(&self.whitelist);
            }
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message("Resolving dependencies...");

        // Installing from the lock resolves against the locked packages only
        let provider = if update { None } else { locked_repository };
        let pool = self.pool.clone();
        let synchronize = self.synchronize;
        let present = installed.clone();

        let resolution = tokio::task::spawn_blocking(move || -> crate::Result<(SolverResult, Vec<Operation>)> {
            let (result, transaction) = match &provider {
                Some(locked) => Solver::new(locked).solve(&request, &present)?,
                None => Solver::new(pool.as_ref()).solve(&request, &present)?,
            };
            Ok((result, transaction.calculate_operations(true, synchronize)))
        })
        .await
        .context("Dependency resolution stopped unexpectedly")?;

        spinner.finish_and_clear();
        let (result, operations) = resolution?;

        let operations = self.filter_operations(operations, &result, &installed);

        if update && !self.dry_run {
            let root = self.manifest.root_package()?;
            if self.locker.set_lock_data(&root, &result.packages, &result.infos)? {
                println!("{} Writing lock file", style("Info:").cyan());
            }
        }

        Ok(operations)
    }

    fn validate_extras(&self, update: bool) -> Result<()> {
        let known: BTreeSet<String> = if update {
            self.manifest.extras.keys().cloned().collect()
        } else {
            self.locker.locked_extras()?.into_keys().collect()
        };

        for extra in &self.extras {
            if !known.contains(extra) {
                return Err(PyxError::ExtraNotFound { extra: extra.clone() }.into());
            }
        }
        Ok(())
    }

    fn active_groups(&self) -> BTreeSet<String> {
        match &self.groups {
            Some(groups) => groups.clone(),
            None => self.manifest.default_groups(),
        }
    }

    /// Skip what this environment and selection do not need.
    ///
    /// Installed packages that are no longer selected by group or extra are
    /// removed instead.
    fn filter_operations(&self, operations: Vec<Operation>, result: &SolverResult, installed: &[Package]) -> Vec<Operation> {
        let groups = self.active_groups();
        let marker_env = self.env.marker_env();

        let mut filtered: Vec<Operation> = Vec::with_capacity(operations.len());
        for operation in operations {
            if let OperationKind::Uninstall { .. } = operation.kind() {
                filtered.push(operation);
                continue;
            }

            let package = operation.package();
            let Some(info) = result.info(&package.name) else {
                filtered.push(operation);
                continue;
            };

            if !info.marker.evaluate(marker_env, &self.extras) {
                filtered.push(operation.skip("Not needed for the current environment"));
                continue;
            }

            let gated = if info.optional && info.extras.is_disjoint(&self.extras) {
                Some("Not required")
            } else if info.groups.is_disjoint(&groups) {
                Some("Not in an active dependency group")
            } else {
                None
            };

            match gated {
                None => filtered.push(operation),
                Some(reason) => match installed.iter().find(|p| p.name == package.name) {
                    Some(present) => {
                        log::debug!("Removing {}: {}", present, reason);
                        filtered.push(Operation::uninstall(present.clone()));
                    }
                    None => filtered.push(operation.skip(reason)),
                },
            }
        }

        filtered.sort_by_key(|op| op.sort_key());
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::env::MockEnvironment;
    use crate::installer::RecordingBackend;
    use crate::package::Dependency;
    use crate::repository::ArrayRepository;
    use tempfile::TempDir;

    const PYPROJECT: &str = r#"
[tool.pyx]
name = "app"
version = "0.1.0"

[tool.pyx.dependencies]
python = "^3.8"
a = "^1.0"
winonly = { version = "^1.0", markers = "sys_platform == 'win32'" }
opt = { version = "^1.0", optional = true }

[tool.pyx.group.docs]
optional = true

[tool.pyx.group.docs.dependencies]
mkdocs = "^1.0"

[tool.pyx.extras]
fancy = ["opt"]
"#;

    fn installer(temp: &TempDir) -> Installer {
        std::fs::write(temp.path().join("pyproject.toml"), PYPROJECT).unwrap();
        let manifest = ProjectManifest::load(temp.path()).unwrap();

        let repository = ArrayRepository::new("test")
            .with_package(Package::parse("a", "1.2.0").unwrap().with_dependency(Dependency::parse_requirement("b>=2").unwrap()))
            .with_package(Package::parse("b", "2.1.0").unwrap())
            .with_package(Package::parse("winonly", "1.0.0").unwrap())
            .with_package(Package::parse("opt", "1.0.0").unwrap())
            .with_package(Package::parse("mkdocs", "1.5.0").unwrap());
        let pool = Arc::new(RepositoryPool::new().with_repository(Arc::new(repository.clone())));

        let env = Arc::new(MockEnvironment::new(temp.path().join("venv")));
        let executor = Executor::new(
            env.clone(),
            Arc::new(repository),
            Arc::new(RecordingBackend::new()),
            ArtifactCache::new(temp.path().join("cache")),
        );

        Installer::new(manifest, env, pool, executor)
            .with_progress(false)
            .with_installed_repository(InstalledRepository::from_packages(vec![]))
    }

    fn describe(operations: &[Operation]) -> Vec<String> {
        operations
            .iter()
            .map(|op| match op.skip_reason() {
                Some(reason) => format!("{} [{}]", op, reason),
                None => op.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let temp = TempDir::new().unwrap();
        let operations = installer(&temp).with_dry_run(true).plan().await.unwrap();

        let described = describe(&operations);
        assert!(described.contains(&"Installing a (1.2.0)".to_string()));
        assert!(described.contains(&"Installing b (2.1.0)".to_string()));
        assert!(described.contains(&"Installing winonly (1.0.0) [Not needed for the current environment]".to_string()));
        assert!(described.contains(&"Installing opt (1.0.0) [Not required]".to_string()));
        assert!(described.contains(&"Installing mkdocs (1.5.0) [Not in an active dependency group]".to_string()));

        // b is a dependency of a and goes first
        let b = described.iter().position(|d| d.starts_with("Installing b")).unwrap();
        let a = described.iter().position(|d| d.starts_with("Installing a")).unwrap();
        assert!(b < a);
    }

    #[tokio::test]
    async fn test_extras_and_groups_activate_packages() {
        let temp = TempDir::new().unwrap();
        let operations = installer(&temp)
            .with_dry_run(true)
            .with_extras(["fancy"])
            .with_groups(["main", "docs"])
            .plan()
            .await
            .unwrap();

        let described = describe(&operations);
        assert!(described.contains(&"Installing opt (1.0.0)".to_string()));
        assert!(described.contains(&"Installing mkdocs (1.5.0)".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_extra() {
        let temp = TempDir::new().unwrap();
        let error = installer(&temp).with_extras(["nope"]).plan().await.unwrap_err();

        assert!(matches!(
            error.downcast_ref::<PyxError>(),
            Some(PyxError::ExtraNotFound { extra }) if extra == "nope"
        ));
    }

    #[tokio::test]
    async fn test_deselected_installed_package_is_removed() {
        let temp = TempDir::new().unwrap();
        let operations = installer(&temp)
            .with_dry_run(true)
            .with_installed_repository(InstalledRepository::from_packages(vec![Package::parse("opt", "1.0.0").unwrap()]))
            .plan()
            .await
            .unwrap();

        assert_eq!(operations[0].to_string(), "Removing opt (1.0.0)");
        assert!(!operations[0].is_skipped());
    }

    #[tokio::test]
    async fn test_lock_only_writes_lock() {
        let temp = TempDir::new().unwrap();
        let mut installer = installer(&temp).with_lock_only(true);

        assert_eq!(installer.run().await.unwrap(), 0);
        assert!(installer.locker().is_locked());
        assert!(installer.locker().is_fresh().unwrap());

        let locked = installer.locker().locked_repository(true).unwrap();
        assert_eq!(locked.len(), 5);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_lock() {
        let temp = TempDir::new().unwrap();
        let mut installer = installer(&temp).with_dry_run(true);

        assert_eq!(installer.run().await.unwrap(), 0);
        assert!(!installer.locker().is_locked());
        assert_eq!(installer.executor().report().installs, 2);
    }
}
