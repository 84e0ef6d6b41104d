//! Core metadata (`METADATA` / `PKG-INFO`) parsing.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use pyx_semver::Version;

use crate::package::{Dependency, Package};
use crate::{PyxError, Result};

/// The fields of a distribution's core metadata the resolver cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreMetadata {
    pub name: String,
    pub version: Version,
    pub summary: String,
    pub requires_python: Option<String>,
    pub requires_dist: Vec<String>,
    pub provides_extra: Vec<String>,
    pub metadata_version: Option<String>,
    /// Fields the backend computes at build time
    pub dynamic: Vec<String>,
}

impl CoreMetadata {
    /// Parse the RFC 822 style header block; the body is ignored
    pub fn parse(content: &str) -> Result<Self> {
        let mut headers: Vec<(String, String)> = Vec::new();

        for line in content.lines() {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = headers.last_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        let single = |key: &str| {
            headers
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        let multi = |key: &str| {
            headers
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .collect::<Vec<_>>()
        };

        let name = single("name").ok_or_else(|| PyxError::InvalidManifest {
            message: "metadata has no Name field".to_string(),
        })?;
        let version = single("version").ok_or_else(|| PyxError::InvalidManifest {
            message: format!("metadata for {} has no Version field", name),
        })?;

        Ok(CoreMetadata {
            version: Version::parse(&version)?,
            name,
            summary: single("summary").unwrap_or_default(),
            requires_python: single("requires-python").filter(|s| !s.is_empty()),
            requires_dist: multi("requires-dist"),
            provides_extra: multi("provides-extra"),
            metadata_version: single("metadata-version"),
            dynamic: multi("dynamic").into_iter().map(|d| d.to_lowercase()).collect(),
        })
    }

    /// Whether `Requires-Dist` can be trusted without building the project.
    ///
    /// Metadata 2.2 marks build-time fields as `Dynamic`; older sdists give
    /// no guarantee unless they list requirements at all.
    pub fn has_static_requirements(&self) -> bool {
        if self.dynamic.iter().any(|d| d == "requires-dist") {
            return false;
        }
        let modern = match (self.metadata_version.as_deref().map(Version::parse), Version::parse("2.2")) {
            (Some(Ok(version)), Ok(dynamic_support)) => version >= dynamic_support,
            _ => false,
        };
        modern || !self.requires_dist.is_empty()
    }

    /// Build a package; requirements gated on `extra == "x"` become members of extra `x`
    pub fn into_package(self) -> Result<Package> {
        let mut package = Package::new(&self.name, self.version).with_description(self.summary);
        if let Some(requires_python) = &self.requires_python {
            package = package.with_python_versions(requires_python.as_str());
        }

        let mut extras: BTreeMap<String, Vec<Dependency>> = BTreeMap::new();
        for extra in &self.provides_extra {
            extras.entry(crate::util::canonicalize_name(extra)).or_default();
        }

        for requirement in &self.requires_dist {
            let dependency = Dependency::parse_requirement(requirement)?;
            let gated_on = dependency.marker.extras();
            if gated_on.is_empty() {
                package = package.with_dependency(dependency);
                continue;
            }

            let marker = dependency.marker.without_extras();
            for extra in gated_on {
                extras
                    .entry(extra)
                    .or_default()
                    .push(dependency.clone().with_marker(marker.clone()));
            }
        }

        for (extra, dependencies) in extras {
            package = package.with_extra(&extra, dependencies);
        }

        Ok(package)
    }
}

/// Read `*.dist-info/METADATA` from a wheel
pub fn read_wheel_metadata(path: &Path) -> Result<CoreMetadata> {
    let reader = BufReader::new(File::open(path)?);
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| PyxError::Archive(format!("Failed to open wheel: {}", e)))?;

    let entry = archive
        .file_names()
        .find(|name| {
            let mut parts = name.split('/');
            matches!(
                (parts.next(), parts.next(), parts.next()),
                (Some(dir), Some("METADATA"), None) if dir.ends_with(".dist-info")
            )
        })
        .map(str::to_string)
        .ok_or_else(|| PyxError::Archive(format!("{} has no METADATA file", path.display())))?;

    let mut content = String::new();
    archive
        .by_name(&entry)
        .map_err(|e| PyxError::Archive(format!("Failed to read {}: {}", entry, e)))?
        .read_to_string(&mut content)?;
    CoreMetadata::parse(&content)
}

/// Read `PKG-INFO` from an extracted source distribution
pub fn read_sdist_metadata(project_root: &Path) -> Result<CoreMetadata> {
    let path = project_root.join("PKG-INFO");
    if !path.is_file() {
        return Err(PyxError::Archive(format!("{} has no PKG-INFO file", project_root.display())));
    }
    CoreMetadata::parse(&std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const METADATA: &str = "Metadata-Version: 2.1
Name: requests
Version: 2.31.0
Summary: Python HTTP for Humans.
Requires-Python: >=3.7
Provides-Extra: socks
Requires-Dist: idna (<4,>=2.5)
Requires-Dist: urllib3 (<3,>=1.21.1)
Requires-Dist: PySocks (!=1.5.7,>=1.5.6) ; extra == 'socks'
Description-Content-Type: text/markdown

# Requests
Requires-Dist: ignored
";

    #[test]
    fn test_parse_headers() {
        let metadata = CoreMetadata::parse(METADATA).unwrap();
        assert_eq!(metadata.name, "requests");
        assert_eq!(metadata.version, Version::parse("2.31.0").unwrap());
        assert_eq!(metadata.requires_python.as_deref(), Some(">=3.7"));
        assert_eq!(metadata.requires_dist.len(), 3);
        assert_eq!(metadata.provides_extra, vec!["socks"]);
    }

    #[test]
    fn test_into_package_splits_extras() {
        let package = CoreMetadata::parse(METADATA).unwrap().into_package().unwrap();
        assert_eq!(package.python_versions, ">=3.7");
        assert_eq!(package.requires().count(), 2);

        let socks = &package.extras["socks"];
        assert_eq!(socks.len(), 1);
        assert_eq!(socks[0].name, "pysocks");
        assert!(socks[0].marker.is_any());
    }

    #[test]
    fn test_missing_version() {
        assert!(CoreMetadata::parse("Name: demo\n").is_err());
    }

    #[test]
    fn test_static_requirements() {
        let modern = CoreMetadata::parse("Metadata-Version: 2.2\nName: demo\nVersion: 1.0\n").unwrap();
        assert!(modern.has_static_requirements());

        let dynamic =
            CoreMetadata::parse("Metadata-Version: 2.2\nName: demo\nVersion: 1.0\nDynamic: Requires-Dist\n").unwrap();
        assert!(!dynamic.has_static_requirements());

        let legacy = CoreMetadata::parse("Metadata-Version: 1.1\nName: demo\nVersion: 1.0\n").unwrap();
        assert!(!legacy.has_static_requirements());
        assert!(CoreMetadata::parse(METADATA).unwrap().has_static_requirements());
    }

    #[test]
    fn test_read_wheel_metadata() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("requests-2.31.0-py3-none-any.whl");

        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("requests/__init__.py", options).unwrap();
        writer.start_file("requests-2.31.0.dist-info/METADATA", options).unwrap();
        writer.write_all(METADATA.as_bytes()).unwrap();
        writer.finish().unwrap();

        let metadata = read_wheel_metadata(&path).unwrap();
        assert_eq!(metadata.name, "requests");
        assert_eq!(metadata.requires_dist.len(), 3);
    }

    #[test]
    fn test_read_sdist_metadata() {
        let temp = TempDir::new().unwrap();
        assert!(read_sdist_metadata(temp.path()).is_err());

        std::fs::write(temp.path().join("PKG-INFO"), METADATA).unwrap();
        assert_eq!(read_sdist_metadata(temp.path()).unwrap().version, Version::parse("2.31.0").unwrap());
    }
}
