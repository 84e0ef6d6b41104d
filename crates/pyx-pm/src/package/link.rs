use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use pyx_semver::Version;
use url::Url;

use crate::env::Wheel;

/// Hash algorithms recognised in link fragments, strongest first
pub const SUPPORTED_HASHES: &[&str] = &["sha512", "sha384", "sha256", "sha224", "sha1", "md5"];

const SDIST_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz", ".tar", ".zip"];

/// A concrete downloadable distribution artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    pub hashes: BTreeMap<String, String>,
    pub yanked: bool,
    pub requires_python: Option<String>,
}

impl Link {
    /// Create a link; a `#sha256=...` fragment is recorded as a hash
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut hashes = BTreeMap::new();

        if let Some((_, fragment)) = url.split_once('#') {
            for pair in fragment.split('&') {
                if let Some((name, value)) = pair.split_once('=') {
                    if SUPPORTED_HASHES.contains(&name) {
                        hashes.insert(name.to_string(), value.to_string());
                    }
                }
            }
        }

        Link {
            url,
            hashes,
            yanked: false,
            requires_python: None,
        }
    }

    /// Create a `file://` link for a local path
    pub fn from_path(path: &Path) -> Self {
        let url = Url::from_file_path(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("file://{}", path.display()));
        Self::new(url)
    }

    pub fn with_hash(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.hashes.insert(name.into(), value.into());
        self
    }

    pub fn with_yanked(mut self, yanked: bool) -> Self {
        self.yanked = yanked;
        self
    }

    pub fn with_requires_python(mut self, requires_python: impl Into<String>) -> Self {
        self.requires_python = Some(requires_python.into());
        self
    }

    pub fn url_without_fragment(&self) -> &str {
        match self.url.split_once('#') {
            Some((base, _)) => base,
            None => &self.url,
        }
    }

    pub fn fragment(&self) -> Option<&str> {
        self.url.split_once('#').map(|(_, fragment)| fragment)
    }

    pub fn subdirectory_fragment(&self) -> Option<&str> {
        self.fragment()?
            .split('&')
            .find_map(|pair| pair.strip_prefix("subdirectory="))
    }

    pub fn filename(&self) -> String {
        let path = self.url_without_fragment();
        let path = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn is_wheel(&self) -> bool {
        self.filename().ends_with(".whl")
    }

    pub fn is_sdist(&self) -> bool {
        let filename = self.filename().to_lowercase();
        SDIST_EXTENSIONS.iter().any(|ext| filename.ends_with(ext))
    }

    pub fn is_file(&self) -> bool {
        self.url.starts_with("file:")
    }

    /// Local path of a `file://` link
    pub fn file_path(&self) -> Option<PathBuf> {
        if !self.is_file() {
            return None;
        }
        Url::parse(self.url_without_fragment())
            .ok()
            .and_then(|u| u.to_file_path().ok())
    }

    /// Strongest hash declared for this link, as `(name, value)`
    pub fn preferred_hash(&self) -> Option<(&str, &str)> {
        SUPPORTED_HASHES
            .iter()
            .find_map(|name| self.hashes.get(*name).map(|value| (*name, value.as_str())))
    }

    /// Hashes in the `name:value` form used by lock files
    pub fn hash_strings(&self) -> Vec<String> {
        self.hashes
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect()
    }

    /// Version encoded in the artifact's file name
    pub fn version(&self) -> Option<Version> {
        let filename = self.filename();
        if self.is_wheel() {
            return Wheel::parse(&filename).ok().map(|w| w.version);
        }

        let lower = filename.to_lowercase();
        let stem = SDIST_EXTENSIONS
            .iter()
            .find_map(|ext| lower.ends_with(ext).then(|| &filename[..filename.len() - ext.len()]))?;
        let (_, version) = stem.rsplit_once('-')?;
        Version::parse(version).ok()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url_without_fragment())
    }
}
