//! pyproject.toml and lock file formats.

mod loader;
mod lock;
mod schema;

pub use loader::{is_valid_package_name, load_pyproject, parse_pyproject, validate_pyproject};
pub use lock::{LockDocument, LockMetadata, LockedFile, LockedPackage, LockedSource, GENERATED_COMMENT};
pub use schema::{
    BuildSystem, DependencySpec, DetailedSpec, GroupTable, ProjectTable, PyProject, SourcePriority, SourceSpec,
    ToolPyx, ToolTable,
};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

use pyx_semver::VersionConstraint;

use crate::downloader::ArchiveType;
use crate::package::{Dependency, Marker, PackageSource, SourceKind};
use crate::Result;

/// `[tool.pyx]` keys that take part in the content hash
const RELEVANT_KEYS: [&str; 5] = ["dependencies", "source", "extras", "dev-dependencies", "group"];

/// Keys hashed even when absent, unless a `[project]` table is in use
const LEGACY_KEYS: [&str; 4] = ["dependencies", "source", "extras", "dev-dependencies"];

const RELEVANT_PROJECT_KEYS: [&str; 3] = ["requires-python", "dependencies", "optional-dependencies"];

/// Fingerprint of the dependency-relevant parts of a pyproject document.
///
/// sha256 over compact JSON with recursively sorted keys. Names, versions,
/// descriptions and other metadata do not take part.
pub fn content_hash(raw: &toml::Table) -> String {
    let table = |value: Option<&toml::Value>| value.and_then(toml::Value::as_table).cloned();

    let project = table(raw.get("project")).unwrap_or_default();
    let tool = table(raw.get("tool").and_then(|t| t.get("pyx"))).unwrap_or_default();

    let mut relevant_project = Map::new();
    for key in RELEVANT_PROJECT_KEYS {
        if let Some(value) = project.get(key) {
            relevant_project.insert(key.to_string(), to_json(value));
        }
    }

    let mut relevant_tool = Map::new();
    for key in RELEVANT_KEYS {
        match tool.get(key) {
            Some(value) => {
                relevant_tool.insert(key.to_string(), to_json(value));
            }
            None if LEGACY_KEYS.contains(&key) && relevant_project.is_empty() => {
                relevant_tool.insert(key.to_string(), Value::Null);
            }
            None => {}
        }
    }

    let relevant = if relevant_project.is_empty() {
        Value::Object(relevant_tool)
    } else {
        let mut tool_table = Map::new();
        tool_table.insert("pyx".to_string(), Value::Object(relevant_tool));
        let mut root = Map::new();
        root.insert("project".to_string(), Value::Object(relevant_project));
        root.insert("tool".to_string(), Value::Object(tool_table));
        Value::Object(root)
    };

    let mut hasher = Sha256::new();
    hasher.update(canonical_json(&relevant).as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_json(value: &toml::Value) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Compact JSON with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }

    sorted(value).to_string()
}

/// Turn a declaration into requirements, one per variant.
///
/// Relative paths are resolved against `base_dir`.
pub fn dependencies_from_spec(name: &str, spec: &DependencySpec, base_dir: &Path) -> Result<Vec<Dependency>> {
    spec.variants()
        .iter()
        .map(|variant| dependency_from_detailed(name, variant, base_dir))
        .collect()
}

fn dependency_from_detailed(name: &str, spec: &DetailedSpec, base_dir: &Path) -> Result<Dependency> {
    let mut dependency = Dependency::new(name, spec.version.as_deref().unwrap_or("*"))?
        .with_extras(&spec.extras)
        .with_optional(spec.optional)
        .with_develop(spec.develop);

    let mut marker = match &spec.markers {
        Some(markers) => Marker::parse(markers)?,
        None => Marker::Any,
    };
    if let Some(python) = &spec.python {
        marker = marker.and(Marker::from_python_constraint(&VersionConstraint::parse(python)?));
    }
    if let Some(platform) = &spec.platform {
        marker = marker.and(Marker::from_platform(platform));
    }
    dependency = dependency.with_marker(marker);

    let source = if let Some(git) = &spec.git {
        let mut source = PackageSource::new(SourceKind::Git, git.as_str());
        if let Some(reference) = spec.branch.as_ref().or(spec.tag.as_ref()).or(spec.rev.as_ref()) {
            source = source.with_reference(reference.as_str());
        }
        Some(source)
    } else if let Some(path) = &spec.path {
        let full = base_dir.join(path);
        let full_str = full.to_string_lossy().into_owned();
        if ArchiveType::from_path(&full).is_some() {
            Some(PackageSource::file(full_str))
        } else {
            Some(PackageSource::directory(full_str))
        }
    } else if let Some(url) = &spec.url {
        Some(PackageSource::url(url.as_str()))
    } else {
        spec.source.as_ref().map(|name| PackageSource::legacy(name.as_str(), ""))
    };

    if let Some(mut source) = source {
        if let Some(subdirectory) = &spec.subdirectory {
            source = source.with_subdirectory(subdirectory.as_str());
        }
        dependency = dependency.with_source(source);
    }

    Ok(dependency)
}

/// Declaration recorded for a requirement in the lock file.
///
/// Local paths are written relative to `base_dir`; a declaration carrying
/// only a version collapses to a bare string.
pub fn spec_from_dependency(dependency: &Dependency, base_dir: &Path) -> DetailedSpec {
    let mut spec = DetailedSpec::default();

    match &dependency.source {
        Some(source) if source.kind.is_local() => {
            let path = Path::new(&source.url);
            let relative = pathdiff::diff_paths(path, base_dir).unwrap_or_else(|| path.to_path_buf());
            spec.path = Some(relative.to_string_lossy().replace('\\', "/"));
            spec.develop = dependency.develop && source.kind == SourceKind::Directory;
        }
        Some(source) if source.kind == SourceKind::Url => spec.url = Some(source.url.clone()),
        Some(source) if source.kind == SourceKind::Git => {
            spec.git = Some(source.url.clone());
            spec.rev = source.reference.clone();
        }
        Some(source) => {
            spec.source = source.reference.clone();
            spec.version = Some(dependency.pretty_constraint.clone());
        }
        None => spec.version = Some(dependency.pretty_constraint.clone()),
    }

    if let Some(subdirectory) = dependency.source.as_ref().and_then(|s| s.subdirectory.clone()) {
        spec.subdirectory = Some(subdirectory);
    }

    spec.extras = dependency.extras.iter().cloned().collect();
    spec.optional = dependency.optional;
    if !dependency.marker.is_any() {
        spec.markers = Some(dependency.marker.to_string());
    }

    spec
}

/// Collapse the declarations for one name into the lock file form
pub fn collapse_specs(specs: Vec<DetailedSpec>) -> Option<DependencySpec> {
    let mut specs = specs;
    match specs.len() {
        0 => None,
        1 => {
            let spec = specs.remove(0);
            if spec.is_version_only() {
                spec.version.map(DependencySpec::Simple)
            } else {
                Some(DependencySpec::Detailed(spec))
            }
        }
        _ => Some(DependencySpec::Multiple(specs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(content: &str) -> String {
        let (_, raw) = parse_pyproject(content).unwrap();
        content_hash(&raw)
    }

    #[test]
    fn test_content_hash_known_value() {
        let content = r#"
            [tool.pyx]
            name = "demo"

            [tool.pyx.dependencies]
            python = "^3.8"
            requests = "^2.31"
        "#;

        // sha256 of {"dependencies":{"python":"^3.8","requests":"^2.31"},"dev-dependencies":null,"extras":null,"source":null}
        assert_eq!(
            hash(content),
            "22202fee1c9ec4058ce4a00ce493c9200baf955adfa032883d853150a0672018"
        );
    }

    #[test]
    fn test_content_hash_ignores_metadata() {
        let base = hash(
            r#"
            [tool.pyx]
            name = "demo"
            version = "0.1.0"
            [tool.pyx.dependencies]
            requests = "^2.31"
            "#,
        );
        let renamed = hash(
            r#"
            [tool.pyx]
            name = "other"
            version = "0.2.0"
            description = "changed"
            [tool.pyx.dependencies]
            requests = "^2.31"
            "#,
        );
        let changed = hash(
            r#"
            [tool.pyx]
            name = "demo"
            [tool.pyx.dependencies]
            requests = "^2.32"
            "#,
        );

        assert_eq!(base, renamed);
        assert_ne!(base, changed);
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value: Value = serde_json::from_str(r#"{"b": {"d": 1, "c": [{"z": 1, "y": 2}]}, "a": null}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":{"c":[{"y":2,"z":1}],"d":1}}"#);
    }

    #[test]
    fn test_dependencies_from_spec() {
        let base = Path::new("/work/project");

        let spec = DependencySpec::Detailed(DetailedSpec {
            path: Some("../lib".to_string()),
            develop: true,
            ..Default::default()
        });
        let deps = dependencies_from_spec("lib", &spec, base).unwrap();
        let source = deps[0].source.as_ref().unwrap();
        assert_eq!(source.kind, SourceKind::Directory);
        assert!(deps[0].develop);

        let spec = DependencySpec::Detailed(DetailedSpec {
            git: Some("https://github.com/example/demo.git".to_string()),
            tag: Some("v1.0".to_string()),
            ..Default::default()
        });
        let deps = dependencies_from_spec("demo", &spec, base).unwrap();
        assert_eq!(deps[0].source.as_ref().unwrap().reference.as_deref(), Some("v1.0"));

        let spec = DependencySpec::Detailed(DetailedSpec {
            version: Some(">=1.0".to_string()),
            python: Some(">=3.8".to_string()),
            ..Default::default()
        });
        let deps = dependencies_from_spec("gated", &spec, base).unwrap();
        assert!(!deps[0].marker.is_any());
    }

    #[test]
    fn test_spec_from_dependency_collapses() {
        let base = Path::new("/work/project");

        let simple = spec_from_dependency(&Dependency::new("idna", ">=2.5,<4").unwrap(), base);
        assert_eq!(
            collapse_specs(vec![simple]),
            Some(DependencySpec::Simple(">=2.5,<4".to_string()))
        );

        let local = Dependency::new("lib", "*")
            .unwrap()
            .with_source(PackageSource::directory("/work/lib"))
            .with_develop(true);
        let spec = spec_from_dependency(&local, base);
        assert_eq!(spec.path.as_deref(), Some("../lib"));
        assert!(spec.develop);
    }
}
