//! Artifact retrieval helpers.
//!
//! Archive extraction, checksum verification and git checkouts used by the
//! artifact cache, the build cache and the executor.

mod archive;
mod checksum;
mod git;

pub use archive::{ArchiveExtractor, ArchiveType};
pub use checksum::{hash_file, parse_hash, sha256_string, verify_checksum, ChecksumType};
pub use git::GitDownloader;
