use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a package's code comes from when it is not the default index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A git repository
    Git,
    /// A local source tree
    Directory,
    /// A local archive
    File,
    /// A remote archive
    Url,
    /// An alternate package index
    Legacy,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Directory => "directory",
            SourceKind::File => "file",
            SourceKind::Url => "url",
            SourceKind::Legacy => "legacy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "git" => Some(SourceKind::Git),
            "directory" => Some(SourceKind::Directory),
            "file" => Some(SourceKind::File),
            "url" => Some(SourceKind::Url),
            "legacy" => Some(SourceKind::Legacy),
            _ => None,
        }
    }

    /// Sources living on the local filesystem
    pub fn is_local(&self) -> bool {
        matches!(self, SourceKind::Directory | SourceKind::File)
    }

    /// Sources that point at a concrete artifact rather than an index
    pub fn is_direct_origin(&self) -> bool {
        !matches!(self, SourceKind::Legacy)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source descriptor for a package
///
/// For `legacy` sources the reference holds the name of the configured index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageSource {
    pub kind: SourceKind,
    pub url: String,
    pub reference: Option<String>,
    pub resolved_reference: Option<String>,
    pub subdirectory: Option<String>,
}

impl PackageSource {
    pub fn new(kind: SourceKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            reference: None,
            resolved_reference: None,
            subdirectory: None,
        }
    }

    /// Creates a git source checked out at `reference`
    pub fn git(url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(SourceKind::Git, url).with_reference(reference)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(SourceKind::Directory, path)
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(SourceKind::File, path)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(SourceKind::Url, url)
    }

    /// Creates a source for a named alternate index
    pub fn legacy(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(SourceKind::Legacy, url).with_reference(name)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_resolved_reference(mut self, reference: impl Into<String>) -> Self {
        self.resolved_reference = Some(reference.into());
        self
    }

    pub fn with_subdirectory(mut self, subdirectory: impl Into<String>) -> Self {
        self.subdirectory = Some(subdirectory.into());
        self
    }

    /// Revision to check out: the resolved commit when known, else the requested reference
    pub fn revision(&self) -> Option<&str> {
        self.resolved_reference
            .as_deref()
            .or(self.reference.as_deref())
    }

    /// Whether two descriptors point at the same origin.
    ///
    /// For git sources the resolved commit takes precedence over the
    /// requested reference when both sides know it.
    pub fn is_same_origin(&self, other: &PackageSource) -> bool {
        if self.kind != other.kind || self.url != other.url || self.subdirectory != other.subdirectory {
            return false;
        }

        match self.kind {
            SourceKind::Git => match (&self.resolved_reference, &other.resolved_reference) {
                (Some(a), Some(b)) => a.starts_with(b.as_str()) || b.starts_with(a.as_str()),
                _ => self.reference == other.reference,
            },
            SourceKind::Legacy => self.reference == other.reference,
            _ => true,
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision() {
            Some(revision) if self.kind == SourceKind::Git => {
                write!(f, "{} {}", self.url, revision)
            }
            _ => write!(f, "{}", self.url),
        }
    }
}
