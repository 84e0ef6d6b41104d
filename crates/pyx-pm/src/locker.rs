use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use pyx_semver::{Version, VersionConstraint};

use crate::package::{Dependency, Marker, Package, PackageFile, PackageSource, SourceKind, MAIN_GROUP};
use crate::pyproject::{
    collapse_specs, dependencies_from_spec, spec_from_dependency, DetailedSpec, LockDocument, LockMetadata,
    LockedFile, LockedPackage, LockedSource,
};
use crate::repository::ArrayRepository;
use crate::solver::TransitivePackageInfo;
use crate::{PyxError, Result};

/// Format written by this version
pub const LOCK_VERSION: &str = "2.1";

/// Formats this version can read
const READ_VERSION_RANGE: &str = ">=1,<3";

/// Persisted resolution state
#[derive(Debug, Clone)]
pub struct Locker {
    path: PathBuf,
    content_hash: String,
}

impl Locker {
    pub fn new(path: impl Into<PathBuf>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// The lock file exists and records at least one package.
    ///
    /// An unreadable file counts as locked so the read error surfaces.
    pub fn is_locked(&self) -> bool {
        if !self.path.is_file() {
            return false;
        }
        match self.read_document() {
            Ok(document) => !document.packages.is_empty(),
            Err(_) => true,
        }
    }

    /// The stored fingerprint matches the current declarations
    pub fn is_fresh(&self) -> Result<bool> {
        let document = self.read_document()?;
        Ok(document
            .metadata
            .map(|m| m.content_hash == self.content_hash)
            .unwrap_or(false))
    }

    fn format_error(&self, message: impl Into<String>) -> PyxError {
        PyxError::LockFormat {
            path: self.path.clone(),
            message: message.into(),
        }
    }

    fn read_document(&self) -> Result<LockDocument> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| self.format_error(format!("unable to read the lock file ({})", e)))?;
        toml::from_str(&content).map_err(|e| self.format_error(format!("unable to parse the lock file ({})", e)))
    }

    /// Read the document, checking that its format can be understood
    pub fn lock_data(&self) -> Result<LockDocument> {
        let document = self.read_document()?;

        let metadata = document
            .metadata
            .as_ref()
            .ok_or_else(|| self.format_error("the lock file does not have a metadata entry"))?;
        let lock_version = metadata
            .lock_version
            .as_deref()
            .ok_or_else(|| self.format_error("the lock file is not compatible with this version of pyx"))?;

        let lock_version = Version::parse(lock_version)
            .map_err(|e| self.format_error(format!("invalid lock-version ({})", e)))?;
        let current = Version::parse(LOCK_VERSION)?;
        let readable = VersionConstraint::parse(READ_VERSION_RANGE)?;

        if !readable.allows(&lock_version) {
            return Err(self.format_error(format!(
                "lock-version {} is not supported, this version of pyx reads {}",
                lock_version, READ_VERSION_RANGE
            )));
        }
        if lock_version > current {
            log::warn!(
                "The lock file uses format {} and might not be compatible with this version of pyx. \
                 Upgrade pyx or regenerate it with `pyx lock`.",
                lock_version
            );
        } else if lock_version < current {
            log::warn!(
                "The lock file uses format {} and might not be read correctly. Regenerate it with `pyx lock`.",
                lock_version
            );
        }

        Ok(document)
    }

    /// Root extras recorded in the lock
    pub fn locked_extras(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(self.lock_data()?.extras)
    }

    /// Rebuild the locked packages.
    ///
    /// Without `include_dev`, packages outside the main group are left out.
    pub fn locked_repository(&self, include_dev: bool) -> Result<ArrayRepository> {
        let mut repository = ArrayRepository::new("locked");
        if !self.path.is_file() {
            return Ok(repository);
        }

        let document = self.lock_data()?;
        let metadata = document.metadata.clone().unwrap_or_default();
        let legacy = metadata
            .lock_version
            .as_deref()
            .and_then(|v| Version::parse(v).ok())
            .map(|v| v < Version::from_parts(&[2, 1]))
            .unwrap_or(true);

        for info in &document.packages {
            let package = self.locked_package(info, &metadata, legacy)?;
            if include_dev || package.groups.contains(MAIN_GROUP) {
                repository.add_package(package);
            }
        }

        Ok(repository)
    }

    fn locked_package(&self, info: &LockedPackage, metadata: &LockMetadata, legacy: bool) -> Result<Package> {
        let mut package = Package::parse(&info.name, &info.version)
            .map_err(|e| self.format_error(format!("invalid package record {}: {}", info.name, e)))?;

        if let Some(source) = &info.source {
            let kind = SourceKind::parse(&source.kind)
                .ok_or_else(|| self.format_error(format!("unknown source type '{}'", source.kind)))?;
            let url = if kind.is_local() {
                self.base_dir().join(&source.url).to_string_lossy().into_owned()
            } else {
                source.url.clone()
            };

            let mut locked = PackageSource::new(kind, url);
            locked.reference = source.reference.clone();
            locked.resolved_reference = source.resolved_reference.clone();
            locked.subdirectory = source.subdirectory.clone();
            package = package.with_source(locked);
        }

        package.description = info.description.clone();
        package.optional = info.optional;
        package.python_versions = info.python_versions.clone();
        package.develop = info.develop;

        // Files live on the package in current locks, in the metadata tables in old ones
        let canonical = &package.name;
        package.files = if let Some(files) = &info.files {
            files.iter().map(|f| PackageFile::new(&f.file, &f.hash)).collect()
        } else if let Some(hashes) = lookup(&metadata.hashes, canonical) {
            hashes.iter().map(|h| PackageFile::new(h, h)).collect()
        } else if matches!(package.source_kind(), Some(SourceKind::Git | SourceKind::Directory | SourceKind::Url)) {
            Vec::new()
        } else {
            let files = lookup(&metadata.files, canonical).cloned().unwrap_or_default();
            let filename = package
                .source_url()
                .filter(|_| package.source_kind() == Some(SourceKind::File))
                .and_then(|url| Path::new(url).file_name())
                .map(|name| name.to_string_lossy().into_owned());
            files
                .into_iter()
                .filter(|f| filename.as_ref().map(|name| *name == f.file).unwrap_or(true))
                .map(|f| PackageFile::new(f.file, f.hash))
                .collect()
        };

        package.groups = if !info.groups.is_empty() {
            info.groups.iter().cloned().collect()
        } else {
            match info.category.as_deref() {
                Some("dev") => ["dev".to_string()].into_iter().collect(),
                _ => [MAIN_GROUP.to_string()].into_iter().collect(),
            }
        };

        package.marker = match &info.markers {
            Some(markers) => Marker::parse(markers)?,
            None if legacy => {
                let mut marker = match VersionConstraint::parse(&info.python_versions) {
                    Ok(constraint) => Marker::from_python_constraint(&constraint),
                    Err(_) => Marker::Any,
                };
                if let Some(platform) = &info.platform {
                    marker = marker.and(Marker::from_platform(platform));
                }
                marker
            }
            None => Marker::Any,
        };

        let dependency_base = match package.source_kind() {
            Some(SourceKind::Directory) => package.source_url().map(PathBuf::from).unwrap_or_default(),
            _ => self.base_dir().to_path_buf(),
        };
        for (name, spec) in &info.dependencies {
            package.dependencies.extend(dependencies_from_spec(name, spec, &dependency_base)?);
        }

        for (extra, requirements) in &info.extras {
            let mut members = Vec::new();
            for requirement in requirements {
                members.push(Dependency::parse_requirement(requirement)?.with_optional(true));
            }
            package.extras.insert(crate::util::canonicalize_name(extra), members);
        }

        Ok(package)
    }

    /// Store the resolution, writing only when it differs from the file.
    ///
    /// Returns whether the file was written. The written file is read back
    /// and must reproduce the same document.
    pub fn set_lock_data(
        &self,
        root: &Package,
        packages: &[Package],
        infos: &HashMap<String, TransitivePackageInfo>,
    ) -> Result<bool> {
        let document = self.compute_lock_data(root, packages, infos);

        if !self.should_write(&document) {
            log::debug!("Lock file {} is up to date", self.path.display());
            return Ok(false);
        }

        self.write_lock_data(&document)?;

        let written = self.lock_data()?;
        if written != document {
            return Err(self.format_error("the written lock file does not reproduce the resolved packages"));
        }

        log::info!("Writing lock file {}", self.path.display());
        Ok(true)
    }

    fn should_write(&self, document: &LockDocument) -> bool {
        if !self.path.is_file() {
            return true;
        }
        match self.lock_data() {
            Ok(existing) => existing != *document,
            Err(_) => true,
        }
    }

    fn write_lock_data(&self, document: &LockDocument) -> Result<()> {
        let mut content = document.to_toml_string()?;

        // Keep the line endings of an existing file
        if let Ok(existing) = fs::read_to_string(&self.path) {
            if existing.lines().next().is_some() && existing.contains("\r\n") {
                content = content.replace("\r\n", "\n").replace('\n', "\r\n");
            }
        }

        fs::write(&self.path, content)?;
        Ok(())
    }

    fn compute_lock_data(
        &self,
        root: &Package,
        packages: &[Package],
        infos: &HashMap<String, TransitivePackageInfo>,
    ) -> LockDocument {
        let mut sorted: Vec<&Package> = packages.iter().collect();
        sorted.sort_by(|a, b| {
            (&a.name, &a.version, a.source_url().unwrap_or(""), a.source_reference().unwrap_or(""))
                .cmp(&(&b.name, &b.version, b.source_url().unwrap_or(""), b.source_reference().unwrap_or("")))
        });

        let extras = root
            .extras
            .iter()
            .map(|(extra, deps)| {
                let mut members: Vec<String> = deps.iter().map(|d| d.pretty_name.clone()).collect();
                members.sort();
                (extra.clone(), members)
            })
            .collect();

        LockDocument {
            packages: sorted
                .into_iter()
                .map(|package| self.dump_package(package, infos.get(&package.name)))
                .collect(),
            extras,
            metadata: Some(LockMetadata {
                lock_version: Some(LOCK_VERSION.to_string()),
                python_versions: root.python_versions.clone(),
                content_hash: self.content_hash.clone(),
                ..Default::default()
            }),
        }
    }

    fn dump_package(&self, package: &Package, info: Option<&TransitivePackageInfo>) -> LockedPackage {
        let mut dependencies: IndexMap<String, Vec<DetailedSpec>> = IndexMap::new();
        let mut sorted: Vec<&Dependency> = package.dependencies.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        for dependency in sorted {
            dependencies
                .entry(dependency.pretty_name.clone())
                .or_default()
                .push(spec_from_dependency(dependency, self.base_dir()));
        }

        let groups: BTreeSet<String> = info.map(|i| i.groups.clone()).unwrap_or_else(|| package.groups.clone());
        let mut groups: Vec<String> = groups.into_iter().collect();
        groups.sort_by_key(|g| (g != MAIN_GROUP, g.clone()));

        let marker = info.map(|i| &i.marker).unwrap_or(&package.marker);

        let mut files: Vec<LockedFile> = package
            .files
            .iter()
            .map(|f| LockedFile {
                file: f.file.clone(),
                hash: f.hash.clone(),
            })
            .collect();
        files.sort();

        let extras = package
            .extras
            .iter()
            .map(|(extra, deps)| {
                let mut requirements: Vec<String> = deps
                    .iter()
                    .map(|d| {
                        let mut requirement = d.clone();
                        requirement.extras.clear();
                        requirement.to_requirement_string()
                    })
                    .collect();
                requirements.sort();
                (extra.clone(), requirements)
            })
            .collect();

        let source = package.source.as_ref().map(|source| {
            let url = if source.kind.is_local() {
                pathdiff::diff_paths(&source.url, self.base_dir())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_else(|| source.url.clone())
            } else {
                source.url.clone()
            };
            LockedSource {
                kind: source.kind.as_str().to_string(),
                url,
                reference: source.reference.clone(),
                resolved_reference: source.resolved_reference.clone(),
                subdirectory: source.subdirectory.clone(),
            }
        });

        LockedPackage {
            name: package.pretty_name.clone(),
            version: package.version.to_string(),
            description: package.description.clone(),
            optional: info.map(|i| i.optional).unwrap_or(package.optional),
            python_versions: package.python_versions.clone(),
            groups,
            category: None,
            markers: (!marker.is_any()).then(|| marker.to_string()),
            platform: None,
            develop: package.develop,
            files: Some(files),
            dependencies: dependencies
                .into_iter()
                .filter_map(|(name, specs)| collapse_specs(specs).map(|spec| (name, spec)))
                .collect(),
            extras,
            source,
        }
    }
}

/// Look up a per-package table entry by canonical name
fn lookup<'a, T>(table: &'a BTreeMap<String, T>, name: &str) -> Option<&'a T> {
    table
        .iter()
        .find(|(key, _)| crate::util::canonicalize_name(key) == name)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locker(temp: &TempDir) -> Locker {
        Locker::new(temp.path().join("pyx.lock"), "abc123")
    }

    fn root() -> Package {
        Package::parse("demo-app", "0.1.0")
            .unwrap()
            .with_python_versions("^3.8")
    }

    #[test]
    fn test_unlocked() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);

        assert!(!locker.is_locked());
        assert!(locker.locked_repository(true).unwrap().is_empty());
    }

    #[test]
    fn test_write_skips_unchanged_document() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        let packages = vec![Package::parse("a", "1.0").unwrap()];

        assert!(locker.set_lock_data(&root(), &packages, &HashMap::new()).unwrap());
        assert!(locker.is_locked());
        assert!(locker.is_fresh().unwrap());
        assert!(!locker.set_lock_data(&root(), &packages, &HashMap::new()).unwrap());

        let stale = Locker::new(locker.path(), "other");
        assert!(!stale.is_fresh().unwrap());
    }

    #[test]
    fn test_newer_minor_format_is_read() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        fs::write(
            locker.path(),
            "[[package]]\nname = \"a\"\nversion = \"1.0\"\n\n[metadata]\nlock-version = \"2.2\"\ncontent-hash = \"abc123\"\n",
        )
        .unwrap();

        assert!(locker.lock_data().is_ok());
        assert_eq!(locker.locked_repository(true).unwrap().len(), 1);
    }

    #[test]
    fn test_refuses_newer_major_format() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        fs::write(
            locker.path(),
            "[[package]]\nname = \"a\"\nversion = \"1.0\"\n\n[metadata]\nlock-version = \"3.0\"\ncontent-hash = \"abc123\"\n",
        )
        .unwrap();

        assert!(matches!(locker.lock_data(), Err(PyxError::LockFormat { .. })));
    }

    #[test]
    fn test_missing_metadata() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        fs::write(locker.path(), "[[package]]\nname = \"a\"\nversion = \"1.0\"\n").unwrap();

        assert!(locker.is_locked());
        assert!(matches!(locker.locked_repository(true), Err(PyxError::LockFormat { .. })));
    }

    #[test]
    fn test_legacy_fields() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        fs::write(
            locker.path(),
            r#"
[[package]]
name = "colorama"
version = "0.4.6"
category = "dev"
optional = false
python-versions = ">=3.7"
platform = "win32"

[[package]]
name = "idna"
version = "3.4"
category = "main"
optional = false
python-versions = "*"

[metadata]
lock-version = "1.1"
python-versions = "^3.8"
content-hash = "abc123"

[metadata.files]
colorama = [
    {file = "colorama-0.4.6-py2.py3-none-any.whl", hash = "sha256:aaa"},
]
idna = [
    {file = "idna-3.4-py3-none-any.whl", hash = "sha256:bbb"},
]
"#,
        )
        .unwrap();

        let repository = locker.locked_repository(true).unwrap();
        let colorama = repository.package("colorama").unwrap();
        assert!(colorama.groups.contains("dev"));
        assert!(!colorama.marker.is_any());
        assert_eq!(colorama.files.len(), 1);

        let idna = repository.package("idna").unwrap();
        assert!(idna.marker.is_any());
        assert_eq!(idna.files[0].hash, "sha256:bbb");

        let main_only = locker.locked_repository(false).unwrap();
        assert!(main_only.package("colorama").is_none());
    }

    #[test]
    fn test_local_sources_are_relative() {
        let temp = TempDir::new().unwrap();
        let locker = locker(&temp);
        let lib_dir = temp.path().join("libs").join("lib");
        let package = Package::parse("lib", "0.1.0")
            .unwrap()
            .with_source(PackageSource::directory(lib_dir.to_string_lossy()))
            .with_develop(true);

        locker.set_lock_data(&root(), &[package], &HashMap::new()).unwrap();

        let content = fs::read_to_string(locker.path()).unwrap();
        assert!(content.contains("url = \"libs/lib\""));

        let repository = locker.locked_repository(true).unwrap();
        let lib = repository.package("lib").unwrap();
        assert_eq!(lib.source_url(), Some(lib_dir.to_string_lossy().as_ref()));
        assert!(lib.develop);
    }
}
