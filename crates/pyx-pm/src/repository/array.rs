use async_trait::async_trait;
use pyx_semver::{Version, VersionConstraint};

use super::{LinkSource, MetadataProvider};
use crate::package::{Link, Package};
use crate::util::canonicalize_name;
use crate::Result;

/// In-memory repository
///
/// Holds complete packages and, optionally, the artifact links of each
/// release. Used for locked packages and as a test double.
#[derive(Debug, Clone, Default)]
pub struct ArrayRepository {
    name: String,
    packages: Vec<Package>,
    links: Vec<(String, Version, Vec<Link>)>,
}

impl ArrayRepository {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn from_packages(name: &str, packages: Vec<Package>) -> Self {
        let mut repository = Self::new(name);
        for package in packages {
            repository.add_package(package);
        }
        repository
    }

    /// Add a package, replacing an existing release with the same name and version
    pub fn add_package(&mut self, package: Package) {
        self.packages
            .retain(|p| !(p.name == package.name && p.version == package.version));
        self.packages.push(package);
    }

    pub fn with_package(mut self, package: Package) -> Self {
        self.add_package(package);
        self
    }

    pub fn remove_package(&mut self, name: &str) {
        let name = canonicalize_name(name);
        self.packages.retain(|p| p.name != name);
    }

    pub fn add_links(&mut self, name: &str, version: &Version, links: Vec<Link>) {
        let name = canonicalize_name(name);
        self.links.retain(|(n, v, _)| !(n == &name && v == version));
        self.links.push((name, version.clone(), links));
    }

    pub fn with_links(mut self, name: &str, version: &str, links: Vec<Link>) -> Result<Self> {
        let version = Version::parse(version)?;
        self.add_links(name, &version, links);
        Ok(self)
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        let name = canonicalize_name(name);
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl MetadataProvider for ArrayRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_packages(&self, name: &str, constraint: &VersionConstraint) -> Result<Vec<Package>> {
        let name = canonicalize_name(name);
        Ok(self
            .packages
            .iter()
            .filter(|p| p.name == name && constraint.allows(&p.version))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LinkSource for ArrayRepository {
    async fn find_links_for_package(&self, package: &Package) -> Result<Vec<Link>> {
        Ok(self
            .links
            .iter()
            .find(|(name, version, _)| name == &package.name && version == &package.version)
            .map(|(_, _, links)| links.clone())
            .unwrap_or_default())
    }
}
