use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::env::{Environment, VirtualEnv};
use crate::http::HttpClient;
use crate::installer::{Executor, InstallBackend, Installer, PipBackend};
use crate::locker::Locker;
use crate::project::ProjectManifest;
use crate::pyproject::{SourcePriority, SourceSpec};
use crate::repository::{Repository, RepositoryPool, SimpleRepository};

/// Interpreter used to create missing virtualenvs
const DEFAULT_BASE_PYTHON: &str = "python3";

/// The central application object: a loaded project with everything
/// needed to lock and install it.
pub struct Pyx {
    pub config: Config,
    pub manifest: ProjectManifest,
    pub pool: Arc<RepositoryPool>,
    pub http_client: Arc<HttpClient>,
    pub env: Arc<dyn Environment>,
    pub working_dir: PathBuf,
    backend: Arc<dyn InstallBackend>,
}

impl Pyx {
    /// Create a new Pyx instance using the builder pattern.
    pub fn builder(working_dir: PathBuf) -> PyxBuilder {
        PyxBuilder::new(working_dir)
    }

    pub fn locker(&self) -> Locker {
        Locker::new(self.manifest.lock_path(), self.manifest.content_hash())
    }

    /// Executor configured from `max-workers`, `parallel`, `no-binary` and `only-binary`
    pub fn executor(&self) -> Executor {
        Executor::new(
            self.env.clone(),
            self.pool.clone(),
            self.backend.clone(),
            ArtifactCache::new(self.config.get_cache_dir()),
        )
        .with_fetcher(self.http_client.clone())
        .with_max_workers(self.config.max_workers)
        .with_parallel(self.config.parallel)
        .with_verbose(self.config.verbose)
        .with_no_binary(self.config.no_binary.clone())
        .with_only_binary(self.config.only_binary.clone())
    }

    pub fn installer(&self) -> Installer {
        Installer::new(self.manifest.clone(), self.env.clone(), self.pool.clone(), self.executor())
            .with_verbose(self.config.verbose)
    }
}

/// Builder for creating Pyx instances.
pub struct PyxBuilder {
    working_dir: PathBuf,
    config: Option<Config>,
    manifest: Option<ProjectManifest>,
    http_client: Option<Arc<HttpClient>>,
    env: Option<Arc<dyn Environment>>,
    backend: Option<Arc<dyn InstallBackend>>,
    additional_repositories: Vec<Arc<dyn Repository>>,
    disable_pypi: bool,
    use_environment: bool,
}

impl PyxBuilder {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            config: None,
            manifest: None,
            http_client: None,
            env: None,
            backend: None,
            additional_repositories: Vec::new(),
            disable_pypi: false,
            use_environment: true,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_manifest(mut self, manifest: ProjectManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Use this environment instead of opening the project's virtualenv
    pub fn with_environment(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn InstallBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Searched before every configured source
    pub fn add_repository(mut self, repo: Arc<dyn Repository>) -> Self {
        self.additional_repositories.push(repo);
        self
    }

    pub fn disable_pypi(mut self, disable: bool) -> Self {
        self.disable_pypi = disable;
        self
    }

    /// Read PYX_* environment variables while building the config
    pub fn use_environment(mut self, enabled: bool) -> Self {
        self.use_environment = enabled;
        self
    }

    pub async fn build(self) -> Result<Pyx> {
        let config = match self.config {
            Some(config) => config,
            None => Config::build(Some(&self.working_dir), self.use_environment)
                .context("Failed to load configuration")?,
        };

        let manifest = match self.manifest {
            Some(manifest) => manifest,
            None => ProjectManifest::load(&self.working_dir)
                .with_context(|| format!("Failed to load project in {}", self.working_dir.display()))?,
        };

        let http_client = match self.http_client {
            Some(client) => client,
            None => Arc::new(HttpClient::with_config(config.http_client_config())?),
        };

        let pool = build_pool(
            &manifest.sources,
            &http_client,
            self.additional_repositories,
            self.disable_pypi,
        )?;

        let env = match self.env {
            Some(env) => env,
            None => {
                let path = config.get_virtualenv_path(&self.working_dir, &manifest.canonical_name());
                Arc::new(open_or_create_env(&path).await?) as Arc<dyn Environment>
            }
        };

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(PipBackend::new()) as Arc<dyn InstallBackend>);

        Ok(Pyx {
            config,
            manifest,
            pool: Arc::new(pool),
            http_client,
            env,
            working_dir: self.working_dir,
            backend,
        })
    }
}

/// Primary sources first, then PyPI, then supplemental and explicit sources
fn build_pool(
    sources: &[SourceSpec],
    client: &Arc<HttpClient>,
    additional: Vec<Arc<dyn Repository>>,
    disable_pypi: bool,
) -> Result<RepositoryPool> {
    let mut pool = RepositoryPool::new();
    for repo in additional {
        pool.add_repository(repo);
    }

    let priority = |source: &SourceSpec| source.priority.unwrap_or_default();

    for source in sources.iter().filter(|s| priority(s) == SourcePriority::Primary) {
        pool.add_repository(source_repository(source, client)?);
    }

    if !disable_pypi {
        let pypi = SimpleRepository::pypi(client.clone())?;
        pool.add_repository(Arc::new(pypi));
    }

    for source in sources.iter().filter(|s| priority(s) != SourcePriority::Primary) {
        pool.add_repository(source_repository(source, client)?);
    }

    Ok(pool)
}

fn source_repository(source: &SourceSpec, client: &Arc<HttpClient>) -> Result<Arc<dyn Repository>> {
    log::debug!("Adding source {} ({})", source.name, source.url);
    let repo = SimpleRepository::new(&source.name, &source.url, client.clone())?.as_secondary();
    Ok(Arc::new(repo))
}

async fn open_or_create_env(path: &Path) -> Result<VirtualEnv> {
    if VirtualEnv::python_path(path).exists() {
        return VirtualEnv::open(path)
            .await
            .with_context(|| format!("Failed to open virtualenv at {}", path.display()));
    }

    VirtualEnv::create(path, Path::new(DEFAULT_BASE_PYTHON))
        .await
        .with_context(|| format!("Failed to create virtualenv at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockEnvironment;
    use crate::installer::RecordingBackend;
    use crate::repository::{ArrayRepository, MetadataProvider};
    use tempfile::TempDir;

    const PYPROJECT: &str = r#"
[project]
name = "demo"
version = "0.1.0"
requires-python = ">=3.8"

[[tool.pyx.source]]
name = "extra"
url = "https://extra.example.com/simple"
priority = "supplemental"

[[tool.pyx.source]]
name = "internal"
url = "https://pypi.internal.example.com/simple"
"#;

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("pyproject.toml"), PYPROJECT).unwrap();
        temp
    }

    #[tokio::test]
    async fn test_source_order() {
        let temp = project();
        let pyx = Pyx::builder(temp.path().to_path_buf())
            .with_config(Config::with_base_dir(temp.path()))
            .with_environment(Arc::new(MockEnvironment::new(temp.path().join("venv"))))
            .add_repository(Arc::new(ArrayRepository::new("local")))
            .build()
            .await
            .unwrap();

        let names: Vec<&str> = pyx.pool.repositories().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["local", "internal", "PyPI", "extra"]);
        assert_eq!(pyx.manifest.name, "demo");
        assert_eq!(pyx.locker().path(), temp.path().join("pyx.lock"));
    }

    #[tokio::test]
    async fn test_executor_follows_config() {
        let temp = project();
        let mut config = Config::with_base_dir(temp.path());
        config.set("max-workers", "2").unwrap();
        config.set("parallel", "false").unwrap();

        let pyx = Pyx::builder(temp.path().to_path_buf())
            .with_config(config)
            .with_environment(Arc::new(MockEnvironment::new(temp.path().join("venv"))))
            .with_backend(Arc::new(RecordingBackend::new()))
            .disable_pypi(true)
            .build()
            .await
            .unwrap();

        assert_eq!(pyx.executor().worker_count(), 1);
        assert_eq!(pyx.pool.repositories().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_project() {
        let temp = TempDir::new().unwrap();
        let result = Pyx::builder(temp.path().to_path_buf())
            .with_config(Config::new())
            .with_environment(Arc::new(MockEnvironment::new("/venv")))
            .build()
            .await;
        assert!(result.is_err());
    }
}
