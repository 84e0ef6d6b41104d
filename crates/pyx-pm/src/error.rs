use std::path::PathBuf;
use thiserror::Error;

use crate::http::HttpError;

#[derive(Error, Debug)]
pub enum PyxError {
    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unable to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Unable to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid manifest: {message}")]
    InvalidManifest { message: String },

    // Network errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Resolution errors
    #[error("{message}\n  {}", .chain.join(" -> "))]
    ResolutionFailure { message: String, chain: Vec<String> },

    #[error("Package not found: {name}")]
    PackageNotFound { name: String },

    #[error("Unable to find installation candidates for {name} ({version})")]
    NoCandidates { name: String, version: String },

    #[error("Unable to determine the dependencies of {package}: {reason}")]
    MetadataUnavailable { package: String, reason: String },

    #[error("Extra [{extra}] is not specified.")]
    ExtraNotFound { extra: String },

    // Lock file errors
    #[error("The lock file at {path} could not be read: {message}\nRun `pyx lock` to regenerate it.")]
    LockFormat { path: PathBuf, message: String },

    #[error("pyproject.toml changed significantly since the lock file was last generated. Run `pyx lock` to fix the lock file.")]
    LockStale,

    // Artifact errors
    #[error("Hash for {package} from archive {archive} not found in known hashes (was: {actual})")]
    HashMismatch {
        package: String,
        archive: String,
        actual: String,
    },

    #[error("Backend operation failed for {package}:\n{output}")]
    BuildFailure { package: String, output: String },

    #[error("Installation backend failed: {0}")]
    InstallBackend(String),

    #[error("Corrupt cache entry: {}", .path.display())]
    CacheCorruption { path: PathBuf },

    #[error("Archive error: {0}")]
    Archive(String),

    // Environment errors
    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Version constraint errors
    #[error("Invalid version constraint: {0}")]
    InvalidConstraint(String),

    #[error("Invalid marker: {0}")]
    InvalidMarker(String),

    // Git errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl From<pyx_semver::VersionError> for PyxError {
    fn from(err: pyx_semver::VersionError) -> Self {
        PyxError::InvalidConstraint(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PyxError>;
