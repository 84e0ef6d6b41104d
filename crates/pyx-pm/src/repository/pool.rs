use async_trait::async_trait;
use std::sync::Arc;

use pyx_semver::VersionConstraint;

use super::{LinkSource, MetadataProvider, Repository};
use crate::package::{Link, Package, SourceKind};
use crate::Result;

/// Repositories in priority order (first = highest priority)
#[derive(Default, Clone)]
pub struct RepositoryPool {
    repositories: Vec<Arc<dyn Repository>>,
}

impl RepositoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a repository with the lowest priority
    pub fn add_repository(&mut self, repository: Arc<dyn Repository>) {
        self.repositories.push(repository);
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.add_repository(repository);
        self
    }

    /// Insert a repository at a specific position (0 = highest priority)
    pub fn insert_repository(&mut self, index: usize, repository: Arc<dyn Repository>) {
        let index = index.min(self.repositories.len());
        self.repositories.insert(index, repository);
    }

    pub fn repositories(&self) -> &[Arc<dyn Repository>] {
        &self.repositories
    }

    pub fn repository(&self, name: &str) -> Option<&Arc<dyn Repository>> {
        self.repositories
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }

    /// The repository a package came from, if it names one
    fn origin_of(&self, package: &Package) -> Option<&Arc<dyn Repository>> {
        match &package.source {
            Some(source) if source.kind == SourceKind::Legacy => {
                source.reference.as_deref().and_then(|name| self.repository(name))
            }
            _ => None,
        }
    }
}

impl MetadataProvider for RepositoryPool {
    fn name(&self) -> &str {
        "pool"
    }

    /// Releases from every repository; a version found in a higher-priority
    /// repository hides the same version further down
    fn find_packages(&self, name: &str, constraint: &VersionConstraint) -> Result<Vec<Package>> {
        let mut packages: Vec<Package> = Vec::new();

        for repository in &self.repositories {
            for package in repository.find_packages(name, constraint)? {
                if !packages.iter().any(|p| p.version == package.version) {
                    packages.push(package);
                }
            }
        }

        Ok(packages)
    }

    fn complete_package(&self, package: &Package) -> Result<Package> {
        if let Some(repository) = self.origin_of(package) {
            return repository.complete_package(package);
        }

        for repository in &self.repositories {
            let known = repository
                .find_packages(&package.name, &VersionConstraint::exact(package.version.clone()))?;
            if !known.is_empty() {
                return repository.complete_package(package);
            }
        }

        Ok(package.clone())
    }
}

#[async_trait]
impl LinkSource for RepositoryPool {
    async fn find_links_for_package(&self, package: &Package) -> Result<Vec<Link>> {
        if let Some(repository) = self.origin_of(package) {
            return repository.find_links_for_package(package).await;
        }

        for repository in &self.repositories {
            let links = repository.find_links_for_package(package).await?;
            if !links.is_empty() {
                return Ok(links);
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageSource;
    use crate::repository::ArrayRepository;

    fn pool() -> RepositoryPool {
        let primary = ArrayRepository::new("primary")
            .with_package(Package::parse("demo", "1.0").unwrap().with_description("primary"))
            .with_links("demo", "1.0", vec![Link::new("https://primary.example.com/demo-1.0.tar.gz")])
            .unwrap();
        let secondary = ArrayRepository::new("secondary")
            .with_package(Package::parse("demo", "1.0").unwrap().with_description("secondary"))
            .with_package(Package::parse("demo", "2.0").unwrap())
            .with_links("demo", "1.0", vec![Link::new("https://secondary.example.com/demo-1.0.tar.gz")])
            .unwrap();

        RepositoryPool::new()
            .with_repository(Arc::new(primary))
            .with_repository(Arc::new(secondary))
    }

    #[test]
    fn test_higher_priority_hides_same_version() {
        let packages = pool().find_packages("demo", &VersionConstraint::any()).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].description, "primary");
    }

    #[tokio::test]
    async fn test_links_follow_named_source() {
        let pool = pool();

        let default = Package::parse("demo", "1.0").unwrap();
        let links = pool.find_links_for_package(&default).await.unwrap();
        assert!(links[0].url.starts_with("https://primary."));

        let pinned = Package::parse("demo", "1.0")
            .unwrap()
            .with_source(PackageSource::legacy("secondary", "https://secondary.example.com/simple/"));
        let links = pool.find_links_for_package(&pinned).await.unwrap();
        assert!(links[0].url.starts_with("https://secondary."));
    }
}
