//! Version type, parsing and ordering

use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Error type for version and constraint parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version string \"{0}\"")]
    InvalidVersion(String),
    #[error("Invalid operator \"{0}\"")]
    InvalidOperator(String),
    #[error("Could not parse version constraint {constraint}: {reason}")]
    InvalidConstraint { constraint: String, reason: String },
}

/// Pre-release phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreReleaseKind {
    Alpha,
    Beta,
    Rc,
}

impl PreReleaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreReleaseKind::Alpha => "a",
            PreReleaseKind::Beta => "b",
            PreReleaseKind::Rc => "rc",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "alpha" => Some(PreReleaseKind::Alpha),
            "b" | "beta" => Some(PreReleaseKind::Beta),
            "c" | "rc" | "pre" | "preview" => Some(PreReleaseKind::Rc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreRelease {
    pub kind: PreReleaseKind,
    pub number: u64,
}

lazy_static! {
    static ref VERSION_REGEX: Regex = Regex::new(
        r"(?ix)^\s*v?
        (?:(?P<epoch>\d+)!)?
        (?P<release>\d+(?:\.\d+)*)
        (?P<pre>[-_.]?(?P<pre_l>alpha|beta|preview|pre|rc|a|b|c)[-_.]?(?P<pre_n>\d+)?)?
        (?P<post>(?:-(?P<post_n1>\d+))|(?:[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d+)?))?
        (?P<dev>[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        \s*$"
    )
    .unwrap();
}

/// A PEP 440 version.
///
/// Equality and ordering ignore trailing zero release segments, so `1.0`
/// and `1.0.0` compare equal.
#[derive(Debug, Clone)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<PreRelease>,
    post: Option<u64>,
    dev: Option<u64>,
    local: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let caps = VERSION_REGEX
            .captures(input)
            .ok_or_else(|| VersionError::InvalidVersion(input.to_string()))?;

        let number = |name: &str| -> Result<Option<u64>, VersionError> {
            caps.name(name)
                .map(|m| m.as_str().parse::<u64>())
                .transpose()
                .map_err(|_| VersionError::InvalidVersion(input.to_string()))
        };

        let epoch = number("epoch")?.unwrap_or(0);

        let release = caps["release"]
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionError::InvalidVersion(input.to_string()))?;

        let pre = match caps.name("pre_l") {
            Some(label) => {
                let kind = PreReleaseKind::parse(label.as_str())
                    .ok_or_else(|| VersionError::InvalidVersion(input.to_string()))?;
                Some(PreRelease {
                    kind,
                    number: number("pre_n")?.unwrap_or(0),
                })
            }
            None => None,
        };

        let post = if caps.name("post").is_some() {
            Some(number("post_n1")?.or(number("post_n2")?).unwrap_or(0))
        } else {
            None
        };

        let dev = if caps.name("dev").is_some() {
            Some(number("dev_n")?.unwrap_or(0))
        } else {
            None
        };

        let local = caps.name("local").map(|m| {
            m.as_str()
                .to_ascii_lowercase()
                .replace(['-', '_'], ".")
        });

        Ok(Version {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// Build a final release from its numeric segments
    pub fn from_parts(release: &[u64]) -> Self {
        let release = if release.is_empty() {
            vec![0]
        } else {
            release.to_vec()
        };

        Version {
            epoch: 0,
            release,
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn major(&self) -> u64 {
        self.segment(0)
    }

    pub fn minor(&self) -> u64 {
        self.segment(1)
    }

    pub fn patch(&self) -> u64 {
        self.segment(2)
    }

    fn segment(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }

    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    pub fn post(&self) -> Option<u64> {
        self.post
    }

    pub fn dev(&self) -> Option<u64> {
        self.dev
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    pub fn is_stable(&self) -> bool {
        !self.is_prerelease()
    }

    /// Number of release segments as written
    pub fn precision(&self) -> usize {
        self.release.len()
    }

    /// The final release this version belongs to
    pub fn stable(&self) -> Version {
        Version {
            epoch: self.epoch,
            release: self.release.clone(),
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn without_local(&self) -> Version {
        Version {
            local: None,
            ..self.clone()
        }
    }

    /// Increment the release segment at `index`, dropping everything after it.
    ///
    /// The result keeps the original precision, so `1.2.3` bumped at index 1
    /// becomes `1.3.0`.
    pub fn bump(&self, index: usize) -> Version {
        let width = self.release.len().max(index + 1);
        let mut release = Vec::with_capacity(width);
        for i in 0..width {
            let value = match i.cmp(&index) {
                Ordering::Less => self.segment(i),
                Ordering::Equal => self.segment(i) + 1,
                Ordering::Greater => 0,
            };
            release.push(value);
        }

        Version {
            epoch: self.epoch,
            release,
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn next_major(&self) -> Version {
        self.bump(0)
    }

    pub fn next_minor(&self) -> Version {
        self.bump(1)
    }

    pub fn next_patch(&self) -> Version {
        self.bump(2)
    }

    /// Lowest version that is still part of this release line, e.g. `2.0.dev0`
    pub fn first_devrelease(&self) -> Version {
        Version {
            epoch: self.epoch,
            release: self.release.clone(),
            pre: None,
            post: None,
            dev: Some(0),
            local: None,
        }
    }

    fn significant_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }

    fn pre_key(&self) -> PreKey {
        match (self.pre, self.post, self.dev) {
            (Some(pre), _, _) => PreKey::Pre(pre),
            (None, None, Some(_)) => PreKey::DevOnly,
            _ => PreKey::Final,
        }
    }

    fn dev_key(&self) -> DevKey {
        match self.dev {
            Some(n) => DevKey::Dev(n),
            None => DevKey::Final,
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    DevOnly,
    Pre(PreRelease),
    Final,
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum DevKey {
    Dev(u64),
    Final,
}

fn compare_release(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn compare_local(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let mut left = a.split('.');
            let mut right = b.split('.');
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(l), Some(r)) => {
                        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                            (Ok(l), Ok(r)) => l.cmp(&r),
                            (Ok(_), Err(_)) => Ordering::Greater,
                            (Err(_), Ok(_)) => Ordering::Less,
                            (Err(_), Err(_)) => l.cmp(r),
                        };
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                }
            }
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| compare_local(self.local(), other.local()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.significant_release().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }

        let release: Vec<String> = self.release.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", release.join("."))?;

        if let Some(pre) = self.pre {
            write!(f, "{}{}", pre.kind.as_str(), pre.number)?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{}", post)?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{}", dev)?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{}", local)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}
