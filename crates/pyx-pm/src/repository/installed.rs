use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::CoreMetadata;
use crate::env::Environment;
use crate::package::{Package, PackageSource};
use crate::util::canonicalize_name;
use crate::Result;

#[derive(Debug, Deserialize)]
struct DirectUrl {
    url: String,
    #[serde(default)]
    subdirectory: Option<String>,
    #[serde(default)]
    vcs_info: Option<VcsInfo>,
    #[serde(default)]
    dir_info: Option<DirInfo>,
    #[serde(default)]
    archive_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VcsInfo {
    #[serde(default)]
    requested_revision: Option<String>,
    #[serde(default)]
    commit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirInfo {
    #[serde(default)]
    editable: bool,
}

fn url_to_path(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string())
}

impl DirectUrl {
    /// Source descriptor and editable flag recorded at install time
    fn into_source(self) -> (Option<PackageSource>, bool) {
        let mut develop = false;
        let source = if let Some(vcs) = self.vcs_info {
            let mut source = PackageSource::git(self.url.trim_start_matches("git+"), vcs.requested_revision.unwrap_or_default());
            if source.reference.as_deref() == Some("") {
                source.reference = None;
            }
            if let Some(commit) = vcs.commit_id {
                source = source.with_resolved_reference(commit);
            }
            Some(source)
        } else if let Some(dir) = self.dir_info {
            develop = dir.editable;
            Some(PackageSource::directory(url_to_path(&self.url)))
        } else if self.archive_info.is_some() && self.url.starts_with("file:") {
            Some(PackageSource::file(url_to_path(&self.url)))
        } else if self.archive_info.is_some() {
            Some(PackageSource::url(self.url))
        } else {
            None
        };

        let source = match (source, self.subdirectory) {
            (Some(source), Some(subdirectory)) => Some(source.with_subdirectory(subdirectory)),
            (source, _) => source,
        };
        (source, develop)
    }
}

/// Packages currently installed in an environment
#[derive(Debug, Clone, Default)]
pub struct InstalledRepository {
    packages: Vec<Package>,
    locations: Vec<(String, PathBuf)>,
}

impl InstalledRepository {
    pub fn from_packages(packages: Vec<Package>) -> Self {
        Self {
            packages,
            locations: Vec::new(),
        }
    }

    /// Scan the environment's site directories for installed distributions
    pub fn load(env: &dyn Environment) -> Result<Self> {
        let mut repository = Self::default();

        for site in env.site_packages() {
            let Ok(entries) = std::fs::read_dir(&site) else {
                log::debug!("Skipping missing site directory {}", site.display());
                continue;
            };

            let mut dirs: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .filter(|p| {
                    p.extension()
                        .map(|ext| ext == "dist-info" || ext == "egg-info")
                        .unwrap_or(false)
                })
                .collect();
            dirs.sort();

            for dir in dirs {
                match Self::read_distribution(&dir) {
                    Ok(Some(package)) => {
                        if repository.package(&package.name).is_none() {
                            repository.locations.push((package.name.clone(), dir));
                            repository.packages.push(package);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("Ignoring unreadable distribution {}: {}", dir.display(), e),
                }
            }
        }

        log::debug!("Found {} installed packages", repository.packages.len());
        Ok(repository)
    }

    fn read_distribution(dir: &Path) -> Result<Option<Package>> {
        let metadata_file = if dir.join("METADATA").is_file() {
            dir.join("METADATA")
        } else if dir.join("PKG-INFO").is_file() {
            dir.join("PKG-INFO")
        } else {
            return Ok(None);
        };

        let metadata = CoreMetadata::parse(&std::fs::read_to_string(metadata_file)?)?;
        let mut package = metadata.into_package()?;

        let direct_url = dir.join("direct_url.json");
        if direct_url.is_file() {
            let direct: DirectUrl = serde_json::from_str(&std::fs::read_to_string(direct_url)?)?;
            let (source, develop) = direct.into_source();
            package.source = source;
            package.develop = develop;
        }

        Ok(Some(package))
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        let name = canonicalize_name(name);
        self.packages.iter().find(|p| p.name == name)
    }

    /// Metadata directory of an installed package
    pub fn location(&self, name: &str) -> Option<&Path> {
        let name = canonicalize_name(name);
        self.locations
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, path)| path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
