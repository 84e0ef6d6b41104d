use std::path::{Path, PathBuf};

use crate::downloader::ArchiveExtractor;
use crate::env::{Environment, VirtualEnv};
use crate::pyproject::load_pyproject;
use crate::{PyxError, Result};

const DEFAULT_BUILD_REQUIRES: &str = "setuptools>=40.8.0";
const DEFAULT_BUILD_BACKEND: &str = "setuptools.build_meta:__legacy__";

/// Loads a PEP 517 backend and prints the name of the built wheel.
///
/// argv: backend, output directory, hook name
const BUILD_SCRIPT: &str = r#"
import importlib, sys
module_name, _, attributes = sys.argv[1].partition(":")
backend = importlib.import_module(module_name)
for attribute in filter(None, attributes.split(".")):
    backend = getattr(backend, attribute)
hook = sys.argv[3]
if not hasattr(backend, hook):
    hook = "build_wheel"
print(getattr(backend, hook)(sys.argv[2]))
"#;

/// Build requirements and backend declared by a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub requires: Vec<String>,
    pub backend: String,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self {
            requires: vec![DEFAULT_BUILD_REQUIRES.to_string()],
            backend: DEFAULT_BUILD_BACKEND.to_string(),
        }
    }
}

impl BuildSpec {
    /// Read `[build-system]` from a source tree, falling back to setuptools
    pub fn for_project(root: &Path) -> Result<Self> {
        let pyproject = root.join("pyproject.toml");
        if !pyproject.is_file() {
            return Ok(Self::default());
        }

        let (document, _) = load_pyproject(&pyproject)?;
        let Some(build_system) = document.build_system else {
            return Ok(Self::default());
        };

        let defaults = Self::default();
        Ok(Self {
            requires: if build_system.requires.is_empty() {
                defaults.requires
            } else {
                build_system.requires
            },
            backend: build_system.build_backend.unwrap_or(defaults.backend),
        })
    }
}

/// Turns source archives into wheels inside throwaway environments
#[derive(Debug, Clone, Default)]
pub struct BuildCache;

impl BuildCache {
    pub fn new() -> Self {
        Self
    }

    /// Wheel to install for an archive or source directory.
    ///
    /// Wheels pass through unchanged unless an editable build is wanted.
    /// Anything else is built into `output_dir`; a failed build leaves
    /// nothing behind there.
    pub async fn prepare(
        &self,
        archive: &Path,
        output_dir: &Path,
        editable: bool,
        env: &dyn Environment,
    ) -> Result<PathBuf> {
        let is_wheel = archive.extension().map(|e| e == "whl").unwrap_or(false);
        if is_wheel && !editable {
            return Ok(archive.to_path_buf());
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let scratch = tempfile::Builder::new().prefix(".build-").tempdir_in(output_dir)?;

        let result = self.build(archive, scratch.path(), editable, env).await;
        let wheel = match result {
            Ok(wheel) => wheel,
            Err(e) => {
                drop(scratch);
                remove_if_empty(output_dir).await;
                return Err(e);
            }
        };

        let file_name = wheel
            .file_name()
            .ok_or_else(|| PyxError::Archive(format!("Build of {} produced no wheel", archive.display())))?;
        let target = output_dir.join(file_name);
        tokio::fs::rename(&wheel, &target).await?;

        Ok(target)
    }

    async fn build(&self, archive: &Path, scratch: &Path, editable: bool, env: &dyn Environment) -> Result<PathBuf> {
        let package = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let source_root = if archive.is_dir() {
            archive.to_path_buf()
        } else {
            let extracted = scratch.join("src");
            ArchiveExtractor::extract(archive, &extracted)?;
            find_project_root(&extracted)
        };

        let spec = BuildSpec::for_project(&source_root)?;
        log::debug!("Building {} with {}", package, spec.backend);

        let venv = scratch.join("env");
        let output = env
            .run(
                env.python(),
                &["-m".to_string(), "venv".to_string(), venv.to_string_lossy().into_owned()],
                None,
            )
            .await?;
        if !output.success() {
            return Err(PyxError::BuildFailure {
                package,
                output: output.combined(),
            });
        }
        let python = VirtualEnv::python_path(&venv);

        let mut install = vec![
            "-m".to_string(),
            "pip".to_string(),
            "install".to_string(),
            "--disable-pip-version-check".to_string(),
            "--no-input".to_string(),
        ];
        install.extend(spec.requires.iter().cloned());
        let output = env.run(&python, &install, Some(&source_root)).await?;
        if !output.success() {
            return Err(PyxError::BuildFailure {
                package,
                output: output.combined(),
            });
        }

        let dist = scratch.join("dist");
        tokio::fs::create_dir_all(&dist).await?;
        let hook = if editable { "build_editable" } else { "build_wheel" };
        let args = vec![
            "-c".to_string(),
            BUILD_SCRIPT.to_string(),
            spec.backend.clone(),
            dist.to_string_lossy().into_owned(),
            hook.to_string(),
        ];
        let output = env.run(&python, &args, Some(&source_root)).await?;
        if !output.success() {
            return Err(PyxError::BuildFailure {
                package,
                output: output.combined(),
            });
        }

        let name = output.stdout.lines().last().unwrap_or_default().trim().to_string();
        let wheel = dist.join(&name);
        if name.is_empty() || !wheel.is_file() {
            return Err(PyxError::BuildFailure {
                package,
                output: format!("The build backend did not produce a wheel\n{}", output.combined()),
            });
        }

        Ok(wheel)
    }
}

/// The project root of an extracted source archive.
///
/// Archives usually wrap everything in a single `name-version/` directory.
pub fn find_project_root(extracted: &Path) -> PathBuf {
    let Ok(entries) = std::fs::read_dir(extracted) else {
        return extracted.to_path_buf();
    };
    let entries: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();

    match entries.as_slice() {
        [single] if single.is_dir() => single.clone(),
        _ => extracted.to_path_buf(),
    }
}

async fn remove_if_empty(dir: &Path) {
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        if let Ok(None) = entries.next_entry().await {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
}
