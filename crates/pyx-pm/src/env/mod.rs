//! Runtime environments packages are installed into.

mod mock;
mod tags;
mod virtual_env;

pub use mock::MockEnvironment;
pub use tags::{platform_tags, supported_tags, PlatformInfo, Tag, Wheel};
pub use virtual_env::VirtualEnv;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::package::MarkerEnvironment;
use crate::util::canonicalize_name;
use crate::Result;

/// Interpreter family and minor version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterpreterInfo {
    pub implementation: String,
    pub major: u32,
    pub minor: u32,
}

impl InterpreterInfo {
    pub fn new(implementation: &str, major: u32, minor: u32) -> Self {
        Self {
            implementation: implementation.to_lowercase(),
            major,
            minor,
        }
    }

    /// Abbreviated implementation name used in tags (`cp`, `pp`, ...)
    pub fn short_name(&self) -> String {
        match self.implementation.as_str() {
            "cpython" => "cp".to_string(),
            "pypy" => "pp".to_string(),
            "ironpython" => "ip".to_string(),
            "jython" => "jy".to_string(),
            other => other.to_string(),
        }
    }

    pub fn version_nodot(&self) -> String {
        format!("{}{}", self.major, self.minor)
    }

    /// e.g. `cp311`
    pub fn tag_name(&self) -> String {
        format!("{}{}", self.short_name(), self.version_nodot())
    }
}

/// Captured result of a subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// An isolated runtime packages can be installed into
#[async_trait]
pub trait Environment: Send + Sync {
    fn path(&self) -> &Path;

    /// Interpreter executable of this environment
    fn python(&self) -> &Path;

    fn site_packages(&self) -> Vec<PathBuf>;

    /// Supported tags, most specific first
    fn supported_tags(&self) -> &[Tag];

    fn marker_env(&self) -> &MarkerEnvironment;

    fn interpreter_info(&self) -> &InterpreterInfo;

    async fn run(&self, program: &Path, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput>;

    /// Where VCS checkouts of editable packages live
    fn src_dir(&self) -> PathBuf {
        self.path().join("src")
    }

    /// Installed `.dist-info` directories for a distribution name
    fn find_distributions(&self, name: &str) -> Vec<PathBuf> {
        find_dist_info(&self.site_packages(), name)
    }
}

/// Run a subprocess to completion, capturing its output
pub async fn run_command(program: &Path, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
    log::debug!("Executing: {} {}", program.display(), args.join(" "));

    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command.output().await?;

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Scan site directories for `<name>-<version>.dist-info` entries
pub fn find_dist_info(site_packages: &[PathBuf], name: &str) -> Vec<PathBuf> {
    let wanted = canonicalize_name(name);
    let mut found = Vec::new();

    for site in site_packages {
        let Ok(entries) = std::fs::read_dir(site) else {
            continue;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = file_name.strip_suffix(".dist-info") else {
                continue;
            };
            let dist_name = stem.split('-').next().unwrap_or_default();
            if canonicalize_name(dist_name) == wanted && entry.path().is_dir() {
                found.push(entry.path());
            }
        }
    }

    found.sort();
    found
}
