//! Utility functions for the package manager.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NAME_SEPARATORS: Regex = Regex::new(r"[-_.]+").unwrap();
}

/// Normalize a distribution name for comparison.
///
/// Names are case-insensitive and treat runs of `-`, `_` and `.` as a single
/// dash.
///
/// # Examples
///
/// ```
/// use pyx_pm::util::canonicalize_name;
///
/// assert_eq!(canonicalize_name("Django_REST.framework"), "django-rest-framework");
/// assert_eq!(canonicalize_name("zope.interface"), "zope-interface");
/// ```
pub fn canonicalize_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(name.trim(), "-")
        .to_ascii_lowercase()
}

/// Form of a name used in wheel and `.dist-info` file names
pub fn distribution_filename_name(name: &str) -> String {
    canonicalize_name(name).replace('-', "_")
}

/// Check if a package belongs to the environment's own tooling.
///
/// These are never removed when synchronizing an environment with the lock file.
///
/// ```
/// use pyx_pm::util::is_environment_tool;
///
/// assert!(is_environment_tool("pip"));
/// assert!(is_environment_tool("Setuptools"));
/// assert!(!is_environment_tool("requests"));
/// ```
pub fn is_environment_tool(name: &str) -> bool {
    matches!(canonicalize_name(name).as_str(), "pip" | "setuptools" | "wheel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_name() {
        assert_eq!(canonicalize_name("Requests"), "requests");
        assert_eq!(canonicalize_name("typing_extensions"), "typing-extensions");
        assert_eq!(canonicalize_name("a__b--c..d"), "a-b-c-d");
    }

    #[test]
    fn test_distribution_filename_name() {
        assert_eq!(distribution_filename_name("Typing-Extensions"), "typing_extensions");
    }

    #[test]
    fn test_is_environment_tool() {
        assert!(is_environment_tool("wheel"));
        assert!(!is_environment_tool("wheels"));
    }
}
