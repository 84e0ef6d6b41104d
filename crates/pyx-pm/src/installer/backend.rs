use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::env::{CommandOutput, Environment};
use crate::package::Package;
use crate::{PyxError, Result};

/// Markers pip prints when it was interrupted
const CANCELLATION_MARKERS: &[&str] = &["KeyboardInterrupt", "Operation cancelled by user"];

/// How an artifact is materialized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallMode {
    pub upgrade: bool,
    pub editable: bool,
}

/// Puts prepared artifacts into an environment and removes them again
#[async_trait]
pub trait InstallBackend: Send + Sync {
    async fn install(&self, env: &dyn Environment, package: &Package, target: &Path, mode: InstallMode)
        -> Result<()>;

    async fn uninstall(&self, env: &dyn Environment, package: &Package) -> Result<()>;
}

/// Drives `python -m pip` inside the environment
#[derive(Debug, Clone, Default)]
pub struct PipBackend;

impl PipBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn install_args(target: &Path, mode: InstallMode) -> Vec<String> {
        let mut args: Vec<String> = [
            "-m",
            "pip",
            "install",
            "--disable-pip-version-check",
            "--no-input",
            "--no-deps",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if mode.upgrade {
            args.push("-U".to_string());
        }
        if mode.editable {
            args.push("-e".to_string());
        }
        args.push(target.to_string_lossy().into_owned());
        args
    }

    pub fn uninstall_args(name: &str) -> Vec<String> {
        vec![
            "-m".to_string(),
            "pip".to_string(),
            "uninstall".to_string(),
            name.to_string(),
            "-y".to_string(),
        ]
    }

    async fn run_pip(&self, env: &dyn Environment, args: &[String]) -> Result<CommandOutput> {
        let output = match env.run(env.python(), args, None).await {
            Err(PyxError::Io(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                log::debug!("pip was interrupted while starting, retrying once");
                env.run(env.python(), args, None).await?
            }
            other => other?,
        };

        let combined = output.combined();
        if CANCELLATION_MARKERS.iter().any(|marker| combined.contains(marker)) {
            return Err(PyxError::Cancelled);
        }
        if !output.success() {
            return Err(PyxError::InstallBackend(combined));
        }

        Ok(output)
    }
}

#[async_trait]
impl InstallBackend for PipBackend {
    async fn install(
        &self,
        env: &dyn Environment,
        package: &Package,
        target: &Path,
        mode: InstallMode,
    ) -> Result<()> {
        log::debug!("Installing {} from {}", package, target.display());
        self.run_pip(env, &Self::install_args(target, mode)).await?;
        Ok(())
    }

    async fn uninstall(&self, env: &dyn Environment, package: &Package) -> Result<()> {
        log::debug!("Removing {}", package);
        self.run_pip(env, &Self::uninstall_args(&package.pretty_name)).await?;
        Ok(())
    }
}

/// A backend call seen by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Install {
        name: String,
        version: String,
        target: PathBuf,
        mode: InstallMode,
    },
    Uninstall {
        name: String,
    },
}

impl BackendCall {
    pub fn name(&self) -> &str {
        match self {
            BackendCall::Install { name, .. } | BackendCall::Uninstall { name } => name,
        }
    }
}

/// Backend double that records calls instead of touching the environment
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    failures: Vec<String>,
    delay: Option<Duration>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call for this package
    pub fn with_failure(mut self, name: &str) -> Self {
        self.failures.push(crate::util::canonicalize_name(name));
        self
    }

    /// Hold every call for a while
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Highest number of calls in flight at once
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn record(&self, package: &Package, call: BackendCall) -> Result<()> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.failures.contains(&package.name) {
            return Err(PyxError::InstallBackend(format!("{} failed to install", package.pretty_name)));
        }
        Ok(())
    }
}

#[async_trait]
impl InstallBackend for RecordingBackend {
    async fn install(
        &self,
        _env: &dyn Environment,
        package: &Package,
        target: &Path,
        mode: InstallMode,
    ) -> Result<()> {
        let call = BackendCall::Install {
            name: package.name.clone(),
            version: package.version.to_string(),
            target: target.to_path_buf(),
            mode,
        };
        self.record(package, call).await
    }

    async fn uninstall(&self, _env: &dyn Environment, package: &Package) -> Result<()> {
        let call = BackendCall::Uninstall {
            name: package.name.clone(),
        };
        self.record(package, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MockEnvironment;

    #[test]
    fn test_install_args() {
        let args = PipBackend::install_args(
            Path::new("/tmp/demo-1.0-py3-none-any.whl"),
            InstallMode {
                upgrade: true,
                editable: false,
            },
        );
        assert_eq!(
            args,
            vec![
                "-m",
                "pip",
                "install",
                "--disable-pip-version-check",
                "--no-input",
                "--no-deps",
                "-U",
                "/tmp/demo-1.0-py3-none-any.whl"
            ]
        );

        let editable = PipBackend::install_args(
            Path::new("/src/demo"),
            InstallMode {
                upgrade: false,
                editable: true,
            },
        );
        assert_eq!(&editable[editable.len() - 2..], &["-e", "/src/demo"]);
    }

    #[tokio::test]
    async fn test_pip_runs_in_environment() {
        let env = MockEnvironment::new("/venv");
        let package = Package::parse("Demo", "1.0").unwrap();

        PipBackend::new().uninstall(&env, &package).await.unwrap();

        let executed = env.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0][0], "/venv/bin/python");
        assert_eq!(&executed[0][1..], &["-m", "pip", "uninstall", "Demo", "-y"]);
    }

    #[tokio::test]
    async fn test_pip_failures() {
        let package = Package::parse("demo", "1.0").unwrap();
        let failing = MockEnvironment::new("/venv").with_response(
            "pip install",
            CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "ERROR: no matching distribution".to_string(),
            },
        );
        let result = PipBackend::new()
            .install(&failing, &package, Path::new("/tmp/demo.whl"), InstallMode::default())
            .await;
        assert!(matches!(result, Err(PyxError::InstallBackend(ref output)) if output.contains("no matching")));

        let interrupted = MockEnvironment::new("/venv").with_response(
            "pip install",
            CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: "ERROR: Operation cancelled by user".to_string(),
            },
        );
        let result = PipBackend::new()
            .install(&interrupted, &package, Path::new("/tmp/demo.whl"), InstallMode::default())
            .await;
        assert!(matches!(result, Err(PyxError::Cancelled)));
    }

    #[tokio::test]
    async fn test_recording_backend() {
        let env = MockEnvironment::new("/venv");
        let backend = RecordingBackend::new().with_failure("Broken");

        let ok = Package::parse("ok", "1.0").unwrap();
        let broken = Package::parse("broken", "1.0").unwrap();

        backend.install(&env, &ok, Path::new("/tmp/ok.whl"), InstallMode::default()).await.unwrap();
        assert!(backend.uninstall(&env, &broken).await.is_err());

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name(), "ok");
        assert_eq!(backend.max_concurrency(), 1);
    }
}
