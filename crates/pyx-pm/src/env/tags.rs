//! Compatibility tags and wheel file names.

use std::fmt;

use pyx_semver::Version;

use super::InterpreterInfo;
use crate::{PyxError, Result};

/// An `interpreter-abi-platform` compatibility tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub interpreter: String,
    pub abi: String,
    pub platform: String,
}

impl Tag {
    pub fn new(interpreter: impl Into<String>, abi: impl Into<String>, platform: impl Into<String>) -> Self {
        Tag {
            interpreter: interpreter.into().to_lowercase(),
            abi: abi.into().to_lowercase(),
            platform: platform.into().to_lowercase(),
        }
    }

    /// Expand a possibly compressed tag set such as `py2.py3-none-any`
    pub fn parse_set(tag: &str) -> Result<Vec<Tag>> {
        let parts: Vec<&str> = tag.split('-').collect();
        let [interpreters, abis, platforms] = parts.as_slice() else {
            return Err(PyxError::Environment(format!("Invalid tag {}", tag)));
        };

        let mut tags = Vec::new();
        for interpreter in interpreters.split('.') {
            for abi in abis.split('.') {
                for platform in platforms.split('.') {
                    tags.push(Tag::new(interpreter, abi, platform));
                }
            }
        }
        Ok(tags)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.interpreter, self.abi, self.platform)
    }
}

/// A parsed wheel file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wheel {
    pub filename: String,
    pub name: String,
    pub version: Version,
    pub build_tag: Option<(u64, String)>,
    pub tags: Vec<Tag>,
}

impl Wheel {
    pub fn parse(filename: &str) -> Result<Self> {
        let invalid = || PyxError::Environment(format!("{} is not a valid wheel filename.", filename));

        let stem = filename.strip_suffix(".whl").ok_or_else(invalid)?;
        let parts: Vec<&str> = stem.split('-').collect();
        let (name, version, build, python, abi, platform) = match parts.as_slice() {
            [name, version, python, abi, platform] => (*name, *version, None, *python, *abi, *platform),
            [name, version, build, python, abi, platform] => (*name, *version, Some(*build), *python, *abi, *platform),
            _ => return Err(invalid()),
        };

        let version = Version::parse(&version.replace('_', "-")).map_err(|_| invalid())?;

        let build_tag = match build {
            Some(build) => {
                let digits: String = build.chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    return Err(invalid());
                }
                let number = digits.parse::<u64>().map_err(|_| invalid())?;
                Some((number, build[digits.len()..].to_string()))
            }
            None => None,
        };

        let tags = Tag::parse_set(&format!("{}-{}-{}", python, abi, platform))?;

        Ok(Wheel {
            filename: filename.to_string(),
            name: name.to_string(),
            version,
            build_tag,
            tags,
        })
    }

    /// Position of the most specific supported tag, lower is better
    pub fn min_support_index(&self, supported: &[Tag]) -> Option<usize> {
        supported.iter().position(|tag| self.tags.contains(tag))
    }

    pub fn is_supported_by(&self, supported: &[Tag]) -> bool {
        self.min_support_index(supported).is_some()
    }
}

/// What the platform part of the tag list is derived from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlatformInfo {
    pub sys_platform: String,
    pub machine: String,
    pub glibc: Option<(u32, u32)>,
    pub macos: Option<(u32, u32)>,
}

/// Platform tags for a machine, most specific first
pub fn platform_tags(info: &PlatformInfo) -> Vec<String> {
    let arch = normalize_arch(&info.machine);
    let mut platforms = Vec::new();

    match info.sys_platform.as_str() {
        "linux" => {
            if let Some((2, glibc_minor)) = info.glibc {
                let oldest = if arch == "x86_64" || arch == "i686" { 5 } else { 17 };
                for minor in (oldest..=glibc_minor).rev() {
                    platforms.push(format!("manylinux_2_{}_{}", minor, arch));
                    let legacy = match minor {
                        17 => Some("manylinux2014"),
                        12 => Some("manylinux2010"),
                        5 => Some("manylinux1"),
                        _ => None,
                    };
                    if let Some(legacy) = legacy {
                        platforms.push(format!("{}_{}", legacy, arch));
                    }
                }
            }
            platforms.push(format!("linux_{}", arch));
        }
        "darwin" => {
            let (major, minor) = info.macos.unwrap_or((10, 16));
            let formats = [arch.clone(), "universal2".to_string()];
            if major >= 11 {
                for m in (11..=major).rev() {
                    for format in &formats {
                        platforms.push(format!("macosx_{}_0_{}", m, format));
                    }
                }
                if arch == "x86_64" {
                    for m in (4..=16).rev() {
                        for format in &formats {
                            platforms.push(format!("macosx_10_{}_{}", m, format));
                        }
                    }
                } else {
                    for m in (4..=16).rev() {
                        platforms.push(format!("macosx_10_{}_universal2", m));
                    }
                }
            } else {
                for m in (0..=minor).rev() {
                    for format in &formats {
                        platforms.push(format!("macosx_10_{}_{}", m, format));
                    }
                }
            }
        }
        "win32" => {
            let platform = match arch.as_str() {
                "x86_64" | "amd64" => "win_amd64",
                "arm64" | "aarch64" => "win_arm64",
                _ => "win32",
            };
            platforms.push(platform.to_string());
        }
        other => platforms.push(format!("{}_{}", other, arch)),
    }

    platforms
}

fn normalize_arch(machine: &str) -> String {
    match machine.to_lowercase().as_str() {
        "amd64" => "x86_64".to_string(),
        other => other.replace(['-', '.', ' '], "_"),
    }
}

fn py_interpreter_range(major: u32, minor: u32) -> Vec<String> {
    let mut versions = vec![format!("py{}{}", major, minor), format!("py{}", major)];
    for m in (0..minor).rev() {
        versions.push(format!("py{}{}", major, m));
    }
    versions
}

/// All tags an interpreter accepts, ordered most to least specific
pub fn supported_tags(interpreter: &InterpreterInfo, platforms: &[String]) -> Vec<Tag> {
    let mut tags = Vec::new();
    let name = interpreter.tag_name();

    if interpreter.short_name() == "cp" {
        for platform in platforms {
            tags.push(Tag::new(&name, &name, platform));
        }
        let abi3 = interpreter.major == 3 && interpreter.minor >= 2;
        if abi3 {
            for platform in platforms {
                tags.push(Tag::new(&name, "abi3", platform));
            }
        }
        for platform in platforms {
            tags.push(Tag::new(&name, "none", platform));
        }
        if abi3 {
            for minor in (2..interpreter.minor).rev() {
                let older = format!("cp{}{}", interpreter.major, minor);
                for platform in platforms {
                    tags.push(Tag::new(&older, "abi3", platform));
                }
            }
        }
    } else {
        for platform in platforms {
            tags.push(Tag::new(&name, "none", platform));
        }
    }

    let py_versions = py_interpreter_range(interpreter.major, interpreter.minor);
    for version in &py_versions {
        for platform in platforms {
            tags.push(Tag::new(version, "none", platform));
        }
    }
    tags.push(Tag::new(&name, "none", "any"));
    for version in &py_versions {
        tags.push(Tag::new(version, "none", "any"));
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp311() -> InterpreterInfo {
        InterpreterInfo::new("cpython", 3, 11)
    }

    #[test]
    fn test_parse_compressed_tag_set() {
        let tags = Tag::parse_set("py2.py3-none-any").unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].to_string(), "py3-none-any");
        assert!(Tag::parse_set("py3-none").is_err());
    }

    #[test]
    fn test_parse_wheel() {
        let wheel = Wheel::parse("demo_pkg-1.0.2-1build-cp311-cp311-manylinux_2_17_x86_64.manylinux2014_x86_64.whl").unwrap();
        assert_eq!(wheel.name, "demo_pkg");
        assert_eq!(wheel.version, Version::parse("1.0.2").unwrap());
        assert_eq!(wheel.build_tag, Some((1, "build".to_string())));
        assert_eq!(wheel.tags.len(), 2);

        assert!(Wheel::parse("demo-1.0.tar.gz").is_err());
        assert!(Wheel::parse("demo-1.0-py3-none.whl").is_err());
    }

    #[test]
    fn test_linux_platform_tags() {
        let info = PlatformInfo {
            sys_platform: "linux".to_string(),
            machine: "x86_64".to_string(),
            glibc: Some((2, 17)),
            macos: None,
        };
        let platforms = platform_tags(&info);
        assert_eq!(platforms[0], "manylinux_2_17_x86_64");
        assert_eq!(platforms[1], "manylinux2014_x86_64");
        assert!(platforms.contains(&"manylinux1_x86_64".to_string()));
        assert_eq!(platforms.last().map(String::as_str), Some("linux_x86_64"));
    }

    #[test]
    fn test_supported_tag_order() {
        let platforms = vec!["manylinux_2_17_x86_64".to_string(), "linux_x86_64".to_string()];
        let tags = supported_tags(&cp311(), &platforms);

        assert_eq!(tags[0].to_string(), "cp311-cp311-manylinux_2_17_x86_64");
        let abi3 = tags.iter().position(|t| t.to_string() == "cp311-abi3-linux_x86_64").unwrap();
        let older_abi3 = tags.iter().position(|t| t.to_string() == "cp38-abi3-linux_x86_64").unwrap();
        let pure = tags.iter().position(|t| t.to_string() == "py3-none-any").unwrap();
        assert!(abi3 < older_abi3);
        assert!(older_abi3 < pure);
        assert_eq!(tags.last().map(|t| t.to_string()), Some("py30-none-any".to_string()));
    }

    #[test]
    fn test_wheel_support_index() {
        let platforms = vec!["linux_x86_64".to_string()];
        let tags = supported_tags(&cp311(), &platforms);

        let specific = Wheel::parse("demo-1.0-cp311-cp311-linux_x86_64.whl").unwrap();
        let pure = Wheel::parse("demo-1.0-py3-none-any.whl").unwrap();
        let foreign = Wheel::parse("demo-1.0-cp311-cp311-win_amd64.whl").unwrap();

        assert!(specific.min_support_index(&tags) < pure.min_support_index(&tags));
        assert!(!foreign.is_supported_by(&tags));
    }
}
