use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::tags::{platform_tags, supported_tags, PlatformInfo, Tag};
use super::{run_command, CommandOutput, Environment, InterpreterInfo};
use crate::package::MarkerEnvironment;
use crate::{PyxError, Result};

const PROBE_SCRIPT: &str = r#"
import json, platform, sys, sysconfig

def fmt(info):
    version = "{0.major}.{0.minor}.{0.micro}".format(info)
    if info.releaselevel != "final":
        version += info.releaselevel[0] + str(info.serial)
    return version

paths = sysconfig.get_paths()
libc = platform.libc_ver()
print(json.dumps({
    "markers": {
        "implementation_name": sys.implementation.name,
        "implementation_version": fmt(sys.implementation.version),
        "os_name": __import__("os").name,
        "platform_machine": platform.machine(),
        "platform_python_implementation": platform.python_implementation(),
        "platform_release": platform.release(),
        "platform_system": platform.system(),
        "platform_version": platform.version(),
        "python_full_version": platform.python_version(),
        "python_version": ".".join(platform.python_version_tuple()[:2]),
        "sys_platform": sys.platform,
    },
    "implementation": sys.implementation.name,
    "major": sys.version_info[0],
    "minor": sys.version_info[1],
    "purelib": paths["purelib"],
    "platlib": paths["platlib"],
    "glibc": libc[1] if libc[0] == "glibc" else None,
    "mac_version": platform.mac_ver()[0] or None,
}))
"#;

#[derive(Debug, Deserialize)]
struct Probe {
    markers: MarkerEnvironment,
    implementation: String,
    major: u32,
    minor: u32,
    purelib: PathBuf,
    platlib: PathBuf,
    glibc: Option<String>,
    mac_version: Option<String>,
}

fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// A `venv` style environment on disk
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    path: PathBuf,
    python: PathBuf,
    interpreter: InterpreterInfo,
    marker_env: MarkerEnvironment,
    tags: Vec<Tag>,
    site_packages: Vec<PathBuf>,
}

impl VirtualEnv {
    /// Interpreter location inside an environment root
    pub fn python_path(root: &Path) -> PathBuf {
        if cfg!(windows) {
            root.join("Scripts").join("python.exe")
        } else {
            root.join("bin").join("python")
        }
    }

    /// Open an existing environment, probing its interpreter once
    pub async fn open(path: &Path) -> Result<Self> {
        let python = Self::python_path(path);
        if !python.exists() {
            return Err(PyxError::Environment(format!(
                "No interpreter found at {}",
                python.display()
            )));
        }

        let output = run_command(&python, &["-c".to_string(), PROBE_SCRIPT.to_string()], None).await?;
        if !output.success() {
            return Err(PyxError::Environment(format!(
                "Unable to inspect {}: {}",
                python.display(),
                output.combined()
            )));
        }

        let probe: Probe = serde_json::from_str(output.stdout.trim())?;
        log::debug!(
            "Using {} {}.{} at {}",
            probe.implementation,
            probe.major,
            probe.minor,
            path.display()
        );

        let platform = PlatformInfo {
            sys_platform: probe.markers.sys_platform.clone(),
            machine: probe.markers.platform_machine.clone(),
            glibc: probe.glibc.as_deref().and_then(parse_major_minor),
            macos: probe.mac_version.as_deref().and_then(parse_major_minor),
        };
        let interpreter = InterpreterInfo::new(&probe.implementation, probe.major, probe.minor);
        let tags = supported_tags(&interpreter, &platform_tags(&platform));

        let mut site_packages = vec![probe.purelib];
        if !site_packages.contains(&probe.platlib) {
            site_packages.push(probe.platlib);
        }

        Ok(Self {
            path: path.to_path_buf(),
            python,
            interpreter,
            marker_env: probe.markers,
            tags,
            site_packages,
        })
    }

    /// Create a new environment with `base_python -m venv` and open it
    pub async fn create(path: &Path, base_python: &Path) -> Result<Self> {
        log::info!("Creating virtualenv at {}", path.display());

        let args = vec![
            "-m".to_string(),
            "venv".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let output = run_command(base_python, &args, None).await?;
        if !output.success() {
            return Err(PyxError::Environment(format!(
                "Failed to create virtualenv at {}: {}",
                path.display(),
                output.combined()
            )));
        }

        Self::open(path).await
    }
}

#[async_trait]
impl Environment for VirtualEnv {
    fn path(&self) -> &Path {
        &self.path
    }

    fn python(&self) -> &Path {
        &self.python
    }

    fn site_packages(&self) -> Vec<PathBuf> {
        self.site_packages.clone()
    }

    fn supported_tags(&self) -> &[Tag] {
        &self.tags
    }

    fn marker_env(&self) -> &MarkerEnvironment {
        &self.marker_env
    }

    fn interpreter_info(&self) -> &InterpreterInfo {
        &self.interpreter
    }

    async fn run(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        run_command(program, args, cwd).await
    }
}
