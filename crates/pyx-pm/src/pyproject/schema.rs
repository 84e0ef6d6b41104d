use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root pyproject.toml structure, reduced to the tables the installer reads
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct PyProject {
    /// PEP 621 metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectTable>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_system: Option<BuildSystem>,

    #[serde(default)]
    pub tool: ToolTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pyx: Option<ToolPyx>,
}

/// `[project]` table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,

    /// PEP 508 requirement strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub optional_dependencies: IndexMap<String, Vec<String>>,
}

/// `[build-system]` table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct BuildSystem {
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_backend: Option<String>,
}

/// `[tool.pyx]` table
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ToolPyx {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Main dependencies; the `python` key holds the interpreter constraint
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, DependencySpec>,

    /// Legacy spelling of the `dev` group
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dev_dependencies: IndexMap<String, DependencySpec>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub group: IndexMap<String, GroupTable>,

    /// Extra name -> names of optional main dependencies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<SourceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupTable {
    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub dependencies: IndexMap<String, DependencySpec>,
}

/// An alternate package index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<SourcePriority>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourcePriority {
    /// Searched before the default index
    #[default]
    Primary,
    /// Searched after the default index
    Supplemental,
    /// Only used by dependencies that name it
    Explicit,
}

/// A dependency declaration: a bare constraint, a table, or several tables
/// gated by markers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DependencySpec {
    Simple(String),
    Detailed(DetailedSpec),
    Multiple(Vec<DetailedSpec>),
}

impl DependencySpec {
    /// Every table this declaration stands for
    pub fn variants(&self) -> Vec<DetailedSpec> {
        match self {
            DependencySpec::Simple(version) => vec![DetailedSpec {
                version: Some(version.clone()),
                ..Default::default()
            }],
            DependencySpec::Detailed(spec) => vec![spec.clone()],
            DependencySpec::Multiple(specs) => specs.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct DetailedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,

    /// Legacy interpreter gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,

    /// Legacy platform gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub develop: bool,

    /// Name of the `[[tool.pyx.source]]` to resolve from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DetailedSpec {
    /// A table carrying nothing but a version collapses to a bare string
    pub fn is_version_only(&self) -> bool {
        self.version.is_some() && *self == DetailedSpec { version: self.version.clone(), ..Default::default() }
    }
}
