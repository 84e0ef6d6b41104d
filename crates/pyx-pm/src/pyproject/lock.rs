use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::DependencySpec;

pub const GENERATED_COMMENT: &str =
    "# This file is automatically @generated by pyx and should not be changed by hand.\n\n";

/// Represents a pyx.lock file
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LockDocument {
    /// Locked packages, sorted by name
    #[serde(default, rename = "package")]
    pub packages: Vec<LockedPackage>,

    /// Root extra name -> member package names
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<String>>,

    /// Absent in documents that predate versioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LockMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LockMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_version: Option<String>,

    #[serde(default = "default_python_versions")]
    pub python_versions: String,

    #[serde(default)]
    pub content_hash: String,

    /// Package name -> files; written by old lock versions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, Vec<LockedFile>>,

    /// Package name -> bare hashes; written by the oldest lock versions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, Vec<String>>,
}

/// A locked package entry
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LockedPackage {
    pub name: String,

    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default = "default_python_versions")]
    pub python_versions: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Legacy group spelling: `main` or `dev`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,

    /// Legacy applicability field, superseded by `markers`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub develop: bool,

    /// `None` when the files live in the legacy metadata tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<LockedFile>>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, DependencySpec>,

    /// Extra name -> requirement strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LockedSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LockedFile {
    pub file: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LockedSource {
    #[serde(rename = "type")]
    pub kind: String,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
}

fn default_python_versions() -> String {
    "*".to_string()
}

impl LockDocument {
    /// Render the document with its header comment
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        Ok(format!("{}{}", GENERATED_COMMENT, toml::to_string(self)?))
    }
}
