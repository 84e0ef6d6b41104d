use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

use pyx_semver::VersionConstraint;

use super::{Marker, Package, PackageSource};
use crate::util::canonicalize_name;
use crate::{PyxError, Result};

pub const MAIN_GROUP: &str = "main";

lazy_static! {
    static ref REQUIREMENT_REGEX: Regex = Regex::new(
        r"^\s*(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?:\((?P<paren>[^)]*)\)|(?P<bare>[^;]*?))\s*(?:;\s*(?P<marker>.+?))?\s*$"
    )
    .unwrap();
}

/// A requirement on another package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub pretty_name: String,
    pub constraint: VersionConstraint,
    pub pretty_constraint: String,
    pub extras: BTreeSet<String>,
    pub optional: bool,
    pub groups: BTreeSet<String>,
    pub marker: Marker,
    pub source: Option<PackageSource>,
    pub develop: bool,
}

impl Dependency {
    pub fn new(name: &str, constraint: &str) -> Result<Self> {
        let pretty_constraint = if constraint.trim().is_empty() { "*" } else { constraint.trim() };
        let parsed = VersionConstraint::parse(pretty_constraint)?;

        Ok(Dependency {
            name: canonicalize_name(name),
            pretty_name: name.trim().to_string(),
            constraint: parsed,
            pretty_constraint: pretty_constraint.to_string(),
            extras: BTreeSet::new(),
            optional: false,
            groups: [MAIN_GROUP.to_string()].into_iter().collect(),
            marker: Marker::Any,
            source: None,
            develop: false,
        })
    }

    /// Parse a requirement string such as `requests[socks] (>=2.0) ; python_version >= "3.8"`
    ///
    /// Both the parenthesised lock-file form and the bare PEP 508 form are accepted.
    pub fn parse_requirement(requirement: &str) -> Result<Self> {
        let caps = REQUIREMENT_REGEX.captures(requirement).ok_or_else(|| {
            PyxError::InvalidConstraint(format!("Invalid requirement \"{}\"", requirement))
        })?;

        let constraint = caps
            .name("paren")
            .or_else(|| caps.name("bare"))
            .map(|m| m.as_str().trim())
            .unwrap_or("");

        let mut dependency = Dependency::new(&caps["name"], constraint)?;

        if let Some(extras) = caps.name("extras") {
            dependency.extras = extras
                .as_str()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(canonicalize_name)
                .collect();
        }

        if let Some(marker) = caps.name("marker") {
            dependency.marker = Marker::parse(marker.as_str())?;
        }

        Ok(dependency)
    }

    pub fn with_extras<I, S>(mut self, extras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extras = extras.into_iter().map(|e| canonicalize_name(e.as_ref())).collect();
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups = [group.to_string()].into_iter().collect();
        self
    }

    pub fn with_marker(mut self, marker: Marker) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_develop(mut self, develop: bool) -> Self {
        self.develop = develop;
        self
    }

    pub fn is_direct_origin(&self) -> bool {
        self.source
            .as_ref()
            .map(|s| s.kind.is_direct_origin())
            .unwrap_or(false)
    }

    /// Whether `package` can fulfil this requirement
    pub fn accepts(&self, package: &Package) -> bool {
        if package.name != self.name {
            return false;
        }

        match (&self.source, &package.source) {
            (Some(wanted), Some(actual)) if wanted.kind.is_direct_origin() => {
                wanted.kind == actual.kind && wanted.url == actual.url
            }
            (Some(wanted), _) if wanted.kind.is_direct_origin() => false,
            _ => self.constraint.allows(&package.version),
        }
    }

    /// Requirement string in the lock-file form
    pub fn to_requirement_string(&self) -> String {
        let mut out = self.pretty_name.clone();
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(String::as_str).collect();
            out.push_str(&format!("[{}]", extras.join(",")));
        }
        if !self.constraint.is_any() {
            out.push_str(&format!(" ({})", self.pretty_constraint));
        }
        if !self.marker.is_any() {
            out.push_str(&format!(" ; {}", self.marker));
        }
        out
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pretty_name, self.pretty_constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyx_semver::Version;

    #[test]
    fn test_new_defaults() {
        let dep = Dependency::new("Requests", "").unwrap();
        assert_eq!(dep.name, "requests");
        assert_eq!(dep.pretty_name, "Requests");
        assert_eq!(dep.pretty_constraint, "*");
        assert!(dep.constraint.is_any());
        assert!(dep.groups.contains(MAIN_GROUP));
    }

    #[test]
    fn test_parse_lock_form() {
        let dep = Dependency::parse_requirement("cryptography[ssh] (>=1.3.4) ; python_version >= \"3.8\"").unwrap();
        assert_eq!(dep.name, "cryptography");
        assert_eq!(dep.pretty_constraint, ">=1.3.4");
        assert!(dep.extras.contains("ssh"));
        assert!(!dep.marker.is_any());
        assert_eq!(
            dep.to_requirement_string(),
            "cryptography[ssh] (>=1.3.4) ; python_version >= \"3.8\""
        );
    }

    #[test]
    fn test_parse_pep508_form() {
        let dep = Dependency::parse_requirement("PySocks>=1.5.6,!=1.5.7").unwrap();
        assert_eq!(dep.name, "pysocks");
        assert_eq!(dep.pretty_constraint, ">=1.5.6,!=1.5.7");
        assert!(dep.constraint.allows(&Version::parse("1.6").unwrap()));
        assert!(!dep.constraint.allows(&Version::parse("1.5.7").unwrap()));

        let bare = Dependency::parse_requirement("idna").unwrap();
        assert!(bare.constraint.is_any());
        assert_eq!(bare.to_requirement_string(), "idna");
    }

    #[test]
    fn test_accepts() {
        let dep = Dependency::new("demo", "^1.0").unwrap();
        assert!(dep.accepts(&Package::parse("demo", "1.4.0").unwrap()));
        assert!(!dep.accepts(&Package::parse("demo", "2.0.0").unwrap()));
        assert!(!dep.accepts(&Package::parse("other", "1.4.0").unwrap()));

        let git = Dependency::new("demo", "*")
            .unwrap()
            .with_source(PackageSource::git("https://example.com/demo.git", "main"));
        let from_git = Package::parse("demo", "0.1.0")
            .unwrap()
            .with_source(PackageSource::git("https://example.com/demo.git", "main"));
        assert!(git.accepts(&from_git));
        assert!(!git.accepts(&Package::parse("demo", "0.1.0").unwrap()));
    }
}
