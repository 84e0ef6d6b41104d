//! Version parsing and constraint matching for Python packages.
//!
//! Versions follow the PEP 440 scheme (epoch, release, pre, post, dev and
//! local segments). Constraints accept PEP 440 specifiers as well as the
//! caret and tilde shorthands used by pyproject-based tooling.

pub mod constraint;
mod version;

pub use constraint::{Bound, Operator, VersionConstraint, VersionRange};
pub use version::{PreRelease, PreReleaseKind, Version, VersionError};
