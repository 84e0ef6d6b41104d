//! Contiguous version ranges

use std::cmp::Ordering;
use std::fmt;

use super::Bound;
use crate::Version;

/// A contiguous interval of versions; a missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionRange {
    min: Option<Bound>,
    max: Option<Bound>,
}

impl VersionRange {
    pub fn new(min: Option<Bound>, max: Option<Bound>) -> Self {
        VersionRange { min, max }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(version: Version) -> Self {
        VersionRange {
            min: Some(Bound::inclusive(version.clone())),
            max: Some(Bound::inclusive(version)),
        }
    }

    pub fn min(&self) -> Option<&Bound> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&Bound> {
        self.max.as_ref()
    }

    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// The single version this range admits, if it is a point
    pub fn as_exact(&self) -> Option<&Version> {
        match (&self.min, &self.max) {
            (Some(min), Some(max))
                if min.is_inclusive() && max.is_inclusive() && min.version() == max.version() =>
            {
                Some(min.version())
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => match min.version().cmp(max.version()) {
                Ordering::Greater => true,
                Ordering::Equal => !(min.is_inclusive() && max.is_inclusive()),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    pub fn allows(&self, version: &Version) -> bool {
        if let Some(min) = &self.min {
            if !min.admits_from_below(version) {
                return false;
            }
        }

        if let Some(max) = &self.max {
            if !max.admits_from_above(version) {
                return false;
            }

            // `<2.0` does not admit 2.0 pre-releases
            if !max.is_inclusive()
                && !max.version().is_prerelease()
                && version.is_prerelease()
                && version.stable() == max.version().stable()
            {
                return false;
            }
        }

        true
    }

    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let min = match (&self.min, &other.min) {
            (Some(a), Some(b)) => Some(if a.cmp_as_lower(b) == Ordering::Less { b.clone() } else { a.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b.clone(),
        };
        let max = match (&self.max, &other.max) {
            (Some(a), Some(b)) => Some(if a.cmp_as_upper(b) == Ordering::Greater { b.clone() } else { a.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let range = VersionRange { min, max };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }

    /// Whether any bound names a pre-release, which opts the range into them
    pub fn mentions_prerelease(&self) -> bool {
        self.min.iter().chain(self.max.iter()).any(|b| b.version().is_prerelease())
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return write!(f, "*");
        }
        if let Some(version) = self.as_exact() {
            return write!(f, "=={}", version);
        }

        let mut parts = Vec::new();
        if let Some(min) = &self.min {
            let op = if min.is_inclusive() { ">=" } else { ">" };
            parts.push(format!("{}{}", op, min));
        }
        if let Some(max) = &self.max {
            let op = if max.is_inclusive() { "<=" } else { "<" };
            parts.push(format!("{}{}", op, max));
        }
        write!(f, "{}", parts.join(","))
    }
}
