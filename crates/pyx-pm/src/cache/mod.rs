//! Artifact cache and source builds.

mod artifact;
mod chef;

pub use artifact::{cache_key, get_cached_archives, ArchiveFetcher, ArtifactCache};
pub use chef::{find_project_root, BuildCache, BuildSpec};
