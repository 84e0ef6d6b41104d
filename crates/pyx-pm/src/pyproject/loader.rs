use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use super::schema::PyProject;
use crate::{PyxError, Result};

lazy_static! {
    static ref PACKAGE_NAME: Regex = Regex::new(r"^(?i)[a-z0-9]([a-z0-9._-]*[a-z0-9])?$").unwrap();
}

/// Load and parse a pyproject.toml file
pub fn load_pyproject(path: &Path) -> Result<(PyProject, toml::Table)> {
    let content = fs::read_to_string(path).map_err(|e| PyxError::InvalidManifest {
        message: format!("Unable to read {}: {}", path.display(), e),
    })?;
    parse_pyproject(&content)
}

/// Parse pyproject.toml from a string, keeping the raw table for fingerprinting
pub fn parse_pyproject(content: &str) -> Result<(PyProject, toml::Table)> {
    let raw: toml::Table = toml::from_str(content)?;
    let pyproject: PyProject = toml::from_str(content)?;
    Ok((pyproject, raw))
}

/// Validate a pyproject structure
pub fn validate_pyproject(pyproject: &PyProject) -> std::result::Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let tool = pyproject.tool.pyx.as_ref();
    let project = pyproject.project.as_ref();

    let name = tool
        .and_then(|t| t.name.as_ref())
        .or_else(|| project.and_then(|p| p.name.as_ref()));
    match name {
        Some(name) if !is_valid_package_name(name) => {
            errors.push(format!("Invalid package name '{}'", name));
        }
        Some(_) => {}
        None => errors.push("The project must declare a name".to_string()),
    }

    if let Some(tool) = tool {
        for (extra, members) in &tool.extras {
            for member in members {
                let declared = tool
                    .dependencies
                    .keys()
                    .any(|name| crate::util::canonicalize_name(name) == crate::util::canonicalize_name(member));
                if !declared {
                    errors.push(format!(
                        "Extra '{}' refers to '{}' which is not a declared dependency",
                        extra, member
                    ));
                }
            }
        }

        let mut names = std::collections::HashSet::new();
        for source in &tool.source {
            if !names.insert(source.name.to_lowercase()) {
                errors.push(format!("Source '{}' is declared more than once", source.name));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check if a distribution name is valid
pub fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME.is_match(name)
}
