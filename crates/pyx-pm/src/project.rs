use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use pyx_semver::VersionConstraint;

use crate::package::{Dependency, Package, MAIN_GROUP};
use crate::pyproject::{
    content_hash, dependencies_from_spec, load_pyproject, parse_pyproject, validate_pyproject, BuildSystem,
    DependencySpec, PyProject, SourceSpec,
};
use crate::solver::Request;
use crate::util::canonicalize_name;
use crate::{PyxError, Result};

pub const LOCK_FILENAME: &str = "pyx.lock";

/// The project being installed, as declared in its pyproject.toml
#[derive(Debug, Clone)]
pub struct ProjectManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Interpreter constraint of the project
    pub python_versions: String,
    /// Requirements of every group, optional extras members included
    pub dependencies: Vec<Dependency>,
    /// Extra name -> canonical names of the optional requirements it enables
    pub extras: BTreeMap<String, BTreeSet<String>>,
    pub sources: Vec<SourceSpec>,
    /// Groups only installed when asked for
    pub optional_groups: BTreeSet<String>,
    pub build_system: Option<BuildSystem>,
    root_dir: PathBuf,
    content_hash: String,
}

impl ProjectManifest {
    /// Load from a pyproject.toml file or the directory holding one
    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.is_dir() { path.join("pyproject.toml") } else { path.to_path_buf() };
        let root_dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

        let (pyproject, raw) = load_pyproject(&file)?;
        Self::from_pyproject(pyproject, &raw, &root_dir)
    }

    pub fn parse(content: &str, root_dir: &Path) -> Result<Self> {
        let (pyproject, raw) = parse_pyproject(content)?;
        Self::from_pyproject(pyproject, &raw, root_dir)
    }

    fn from_pyproject(pyproject: PyProject, raw: &toml::Table, root_dir: &Path) -> Result<Self> {
        validate_pyproject(&pyproject).map_err(|errors| PyxError::InvalidManifest {
            message: errors.join("\n"),
        })?;

        let tool = pyproject.tool.pyx.unwrap_or_default();
        let project = pyproject.project.unwrap_or_default();

        let name = tool.name.or(project.name).unwrap_or_default();
        let version = tool.version.or(project.version).unwrap_or_else(|| "0.0.0".to_string());
        let description = tool.description.or(project.description).unwrap_or_default();

        let python_versions = match tool.dependencies.get("python") {
            Some(DependencySpec::Simple(constraint)) => constraint.clone(),
            _ => project.requires_python.clone().unwrap_or_else(|| "*".to_string()),
        };

        let mut dependencies = Vec::new();
        for (dep_name, spec) in &tool.dependencies {
            if dep_name == "python" {
                continue;
            }
            dependencies.extend(dependencies_from_spec(dep_name, spec, root_dir)?);
        }
        for (dep_name, spec) in &tool.dev_dependencies {
            for dependency in dependencies_from_spec(dep_name, spec, root_dir)? {
                dependencies.push(dependency.with_group("dev"));
            }
        }

        let mut optional_groups = BTreeSet::new();
        for (group, table) in &tool.group {
            let group = canonicalize_name(group);
            if table.optional {
                optional_groups.insert(group.clone());
            }
            for (dep_name, spec) in &table.dependencies {
                for dependency in dependencies_from_spec(dep_name, spec, root_dir)? {
                    dependencies.push(dependency.with_group(&group));
                }
            }
        }

        for requirement in &project.dependencies {
            dependencies.push(Dependency::parse_requirement(requirement)?);
        }

        let mut extras: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (extra, members) in &tool.extras {
            extras.insert(
                canonicalize_name(extra),
                members.iter().map(|m| canonicalize_name(m)).collect(),
            );
        }
        for (extra, requirements) in &project.optional_dependencies {
            let members = extras.entry(canonicalize_name(extra)).or_default();
            for requirement in requirements {
                let dependency = Dependency::parse_requirement(requirement)?.with_optional(true);
                members.insert(dependency.name.clone());
                dependencies.push(dependency);
            }
        }

        log::debug!(
            "Loaded project {} with {} requirements and {} extras",
            name,
            dependencies.len(),
            extras.len()
        );

        Ok(Self {
            name,
            version,
            description,
            python_versions,
            dependencies,
            extras,
            sources: tool.source,
            optional_groups,
            build_system: pyproject.build_system,
            root_dir: root_dir.to_path_buf(),
            content_hash: content_hash(raw),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root_dir.join(LOCK_FILENAME)
    }

    /// Fingerprint of the dependency declarations
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn canonical_name(&self) -> String {
        canonicalize_name(&self.name)
    }

    /// Every declared group name
    pub fn groups(&self) -> BTreeSet<String> {
        self.dependencies
            .iter()
            .flat_map(|d| d.groups.iter().cloned())
            .chain(std::iter::once(MAIN_GROUP.to_string()))
            .collect()
    }

    /// Groups installed when none are selected explicitly
    pub fn default_groups(&self) -> BTreeSet<String> {
        self.groups()
            .into_iter()
            .filter(|g| !self.optional_groups.contains(g))
            .collect()
    }

    pub fn python_constraint(&self) -> Result<VersionConstraint> {
        Ok(VersionConstraint::parse(&self.python_versions)?)
    }

    /// The project as a package: its requirements, extras and interpreter range
    pub fn root_package(&self) -> Result<Package> {
        let mut package = Package::parse(&self.name, &self.version)?
            .with_description(self.description.clone())
            .with_python_versions(self.python_versions.clone());
        package.dependencies = self.dependencies.clone();

        for (extra, members) in &self.extras {
            let dependencies = self
                .dependencies
                .iter()
                .filter(|d| members.contains(&d.name))
                .cloned()
                .collect();
            package.extras.insert(extra.clone(), dependencies);
        }

        Ok(package)
    }

    /// A resolution request over every group and extra
    pub fn request(&self) -> Result<Request> {
        let mut request = Request::new(&self.name);
        for dependency in &self.dependencies {
            request.require(dependency.clone());
        }
        for (extra, members) in &self.extras {
            request.extra(extra, members);
        }
        request.with_python_versions(self.python_constraint()?);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYPROJECT: &str = r#"
        [tool.pyx]
        name = "demo-app"
        version = "0.1.0"

        [tool.pyx.dependencies]
        python = "^3.8"
        requests = { version = "^2.31", extras = ["socks"] }
        pysocks = { version = "^1.7", optional = true }

        [tool.pyx.group.dev.dependencies]
        pytest = "^7.0"

        [tool.pyx.group.docs]
        optional = true

        [tool.pyx.group.docs.dependencies]
        mkdocs = "*"

        [tool.pyx.extras]
        socks = ["PySocks"]
    "#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ProjectManifest::parse(PYPROJECT, Path::new("/work/demo")).unwrap();

        assert_eq!(manifest.name, "demo-app");
        assert_eq!(manifest.python_versions, "^3.8");
        assert_eq!(manifest.dependencies.len(), 4);
        assert_eq!(manifest.lock_path(), Path::new("/work/demo/pyx.lock"));

        let groups: Vec<String> = manifest.groups().into_iter().collect();
        assert_eq!(groups, vec!["dev", "docs", "main"]);
        assert!(!manifest.default_groups().contains("docs"));

        assert!(manifest.extras["socks"].contains("pysocks"));
    }

    #[test]
    fn test_root_package_extras() {
        let manifest = ProjectManifest::parse(PYPROJECT, Path::new("/work/demo")).unwrap();
        let root = manifest.root_package().unwrap();

        assert_eq!(root.name, "demo-app");
        assert_eq!(root.extras["socks"].len(), 1);
        assert_eq!(root.extras["socks"][0].name, "pysocks");
    }

    #[test]
    fn test_request_covers_every_group() {
        let manifest = ProjectManifest::parse(PYPROJECT, Path::new("/work/demo")).unwrap();
        let request = manifest.request().unwrap();

        assert_eq!(request.root, "demo-app");
        assert_eq!(request.requires.len(), 4);
        assert!(request.extras.contains_key("socks"));
        assert!(!request.python_versions.is_any());
    }

    #[test]
    fn test_project_table() {
        let manifest = ProjectManifest::parse(
            r#"
            [project]
            name = "demo"
            version = "1.0"
            requires-python = ">=3.9"
            dependencies = ["requests>=2.31"]

            [project.optional-dependencies]
            socks = ["PySocks>=1.7"]
            "#,
            Path::new("/work/demo"),
        )
        .unwrap();

        assert_eq!(manifest.python_versions, ">=3.9");
        assert_eq!(manifest.dependencies.len(), 2);
        assert!(manifest.dependencies[1].optional);
        assert!(manifest.extras["socks"].contains("pysocks"));
    }

    #[test]
    fn test_invalid_manifest() {
        let result = ProjectManifest::parse("[tool.pyx]\nversion = \"1.0\"\n", Path::new("/tmp"));
        assert!(matches!(result, Err(PyxError::InvalidManifest { .. })));
    }
}
