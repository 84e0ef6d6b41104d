use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use pyx_semver::Version;

use super::{Dependency, Marker, PackageSource, SourceKind, MAIN_GROUP};
use crate::util::canonicalize_name;
use crate::Result;

/// A distribution file known for a package release
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageFile {
    pub file: String,
    pub hash: String,
}

impl PackageFile {
    pub fn new(file: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            hash: hash.into(),
        }
    }
}

/// A concrete release of a package
///
/// Two packages are equal when their name, version and source agree; the
/// remaining metadata describes the release but does not identify it.
#[derive(Debug, Clone)]
pub struct Package {
    /// Canonical name
    pub name: String,
    pub pretty_name: String,
    pub version: Version,
    pub description: String,
    /// `None` for packages from the default index
    pub source: Option<PackageSource>,
    pub develop: bool,
    pub optional: bool,
    pub python_versions: String,
    pub marker: Marker,
    pub groups: BTreeSet<String>,
    pub dependencies: Vec<Dependency>,
    /// Extra name -> the optional dependencies it activates
    pub extras: BTreeMap<String, Vec<Dependency>>,
    pub files: Vec<PackageFile>,
}

impl Package {
    pub fn new(name: &str, version: Version) -> Self {
        Package {
            name: canonicalize_name(name),
            pretty_name: name.to_string(),
            version,
            description: String::new(),
            source: None,
            develop: false,
            optional: false,
            python_versions: "*".to_string(),
            marker: Marker::Any,
            groups: [MAIN_GROUP.to_string()].into_iter().collect(),
            dependencies: Vec::new(),
            extras: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    pub fn parse(name: &str, version: &str) -> Result<Self> {
        Ok(Self::new(name, Version::parse(version)?))
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Register an extra; its dependencies are also recorded as optional requirements
    pub fn with_extra(mut self, extra: &str, dependencies: Vec<Dependency>) -> Self {
        for dependency in &dependencies {
            if !self.dependencies.iter().any(|d| d.name == dependency.name) {
                self.dependencies.push(dependency.clone().with_optional(true));
            }
        }
        self.extras.insert(canonicalize_name(extra), dependencies);
        self
    }

    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<String>, hash: impl Into<String>) -> Self {
        self.files.push(PackageFile::new(file, hash));
        self
    }

    pub fn with_develop(mut self, develop: bool) -> Self {
        self.develop = develop;
        self
    }

    pub fn with_python_versions(mut self, python_versions: impl Into<String>) -> Self {
        self.python_versions = python_versions.into();
        self
    }

    pub fn source_kind(&self) -> Option<SourceKind> {
        self.source.as_ref().map(|s| s.kind)
    }

    pub fn source_url(&self) -> Option<&str> {
        self.source.as_ref().map(|s| s.url.as_str())
    }

    pub fn source_reference(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.reference.as_deref())
    }

    pub fn source_resolved_reference(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.resolved_reference.as_deref())
    }

    pub fn source_subdirectory(&self) -> Option<&str> {
        self.source.as_ref().and_then(|s| s.subdirectory.as_deref())
    }

    /// Required (non-optional) dependencies
    pub fn requires(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| !d.optional)
    }

    /// Known file hashes in `name:value` form
    pub fn known_hashes(&self) -> BTreeSet<&str> {
        self.files.iter().map(|f| f.hash.as_str()).collect()
    }

    /// Whether both describe the same origin, ignoring the version
    pub fn is_same_source_as(&self, other: &Package) -> bool {
        match (&self.source, &other.source) {
            (None, None) => true,
            (Some(a), Some(b)) => a.is_same_origin(b),
            _ => false,
        }
    }

    pub fn unique_name(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    pub fn full_pretty_version(&self) -> String {
        match &self.source {
            Some(source) if source.kind == SourceKind::Git => match source.revision() {
                Some(revision) => format!("{} {}", self.version, &revision[..revision.len().min(7)]),
                None => self.version.to_string(),
            },
            _ => self.version.to_string(),
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.version == other.version && self.is_same_source_as(other)
    }
}

impl Eq for Package {}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pretty_name, self.full_pretty_version())
    }
}
