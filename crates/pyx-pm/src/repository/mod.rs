//! Package repositories.
//!
//! Two seams are consumed by the pipeline: [`MetadataProvider`] answers the
//! solver's synchronous "which releases of X satisfy C" questions, and
//! [`LinkSource`] lists the downloadable artifacts of one release for the
//! chooser.

mod array;
mod installed;
mod metadata;
mod pool;
mod simple;

pub use array::ArrayRepository;
pub use installed::InstalledRepository;
pub use metadata::CoreMetadata;
pub use pool::RepositoryPool;
pub use simple::{SimpleRepository, PYPI_SIMPLE_URL};

use async_trait::async_trait;

use pyx_semver::VersionConstraint;

use crate::package::{Link, Package};
use crate::Result;

/// Source of release metadata for the solver
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Releases of `name` allowed by `constraint`, in no particular order
    fn find_packages(&self, name: &str, constraint: &VersionConstraint) -> Result<Vec<Package>>;

    /// Fill in the dependency metadata of a release returned by `find_packages`
    fn complete_package(&self, package: &Package) -> Result<Package> {
        Ok(package.clone())
    }
}

/// Source of downloadable artifacts
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn find_links_for_package(&self, package: &Package) -> Result<Vec<Link>>;
}

/// A repository usable both for resolution and for artifact selection
pub trait Repository: MetadataProvider + LinkSource {}

impl<T: MetadataProvider + LinkSource> Repository for T {}
