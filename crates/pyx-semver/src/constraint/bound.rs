//! Bound type for range boundaries

use std::cmp::Ordering;
use std::fmt;

use crate::Version;

/// One end of a version range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    version: Version,
    is_inclusive: bool,
}

impl Bound {
    pub fn new(version: Version, is_inclusive: bool) -> Self {
        Bound {
            version,
            is_inclusive,
        }
    }

    pub fn inclusive(version: Version) -> Self {
        Self::new(version, true)
    }

    pub fn exclusive(version: Version) -> Self {
        Self::new(version, false)
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_inclusive(&self) -> bool {
        self.is_inclusive
    }

    /// Order two lower bounds; the stricter one compares greater
    pub(crate) fn cmp_as_lower(&self, other: &Bound) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| other.is_inclusive.cmp(&self.is_inclusive))
    }

    /// Order two upper bounds; the stricter one compares smaller
    pub(crate) fn cmp_as_upper(&self, other: &Bound) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.is_inclusive.cmp(&other.is_inclusive))
    }

    pub(crate) fn admits_from_below(&self, version: &Version) -> bool {
        if self.is_inclusive {
            version >= &self.version
        } else {
            version > &self.version
        }
    }

    pub(crate) fn admits_from_above(&self, version: &Version) -> bool {
        if self.is_inclusive {
            version <= &self.version
        } else {
            version < &self.version
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)
    }
}
