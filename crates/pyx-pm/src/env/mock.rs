use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::tags::{platform_tags, supported_tags, PlatformInfo, Tag};
use super::{CommandOutput, Environment, InterpreterInfo};
use crate::package::MarkerEnvironment;
use crate::Result;

/// In-memory environment that records commands instead of running them
///
/// Defaults to CPython 3.11 on `manylinux_2_17_x86_64`. Commands whose
/// joined command line contains a registered pattern get the registered
/// output, everything else succeeds with empty output.
#[derive(Debug)]
pub struct MockEnvironment {
    path: PathBuf,
    python: PathBuf,
    interpreter: InterpreterInfo,
    marker_env: MarkerEnvironment,
    tags: Vec<Tag>,
    site_packages: PathBuf,
    responses: Vec<(String, CommandOutput)>,
    executed: Mutex<Vec<Vec<String>>>,
}

impl MockEnvironment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let interpreter = InterpreterInfo::new("cpython", 3, 11);
        let platform = PlatformInfo {
            sys_platform: "linux".to_string(),
            machine: "x86_64".to_string(),
            glibc: Some((2, 17)),
            macos: None,
        };

        Self {
            python: path.join("bin").join("python"),
            site_packages: path.join("lib").join("python3.11").join("site-packages"),
            tags: supported_tags(&interpreter, &platform_tags(&platform)),
            marker_env: MarkerEnvironment::cpython("3.11.4", "linux"),
            interpreter,
            path,
            responses: Vec::new(),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_marker_env(mut self, marker_env: MarkerEnvironment) -> Self {
        self.marker_env = marker_env;
        self
    }

    pub fn with_response(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.responses.push((pattern.to_string(), output));
        self
    }

    /// Command lines run so far, program first
    pub fn executed(&self) -> Vec<Vec<String>> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Environment for MockEnvironment {
    fn path(&self) -> &Path {
        &self.path
    }

    fn python(&self) -> &Path {
        &self.python
    }

    fn site_packages(&self) -> Vec<PathBuf> {
        vec![self.site_packages.clone()]
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

    async fn run(&self, program: &Path, args: &[String], _cwd: Option<&Path>) -> Result<CommandOutput> {
        let mut command = vec![program.to_string_lossy().into_owned()];
        command.extend(args.iter().cloned());
        let line = command.join(" ");

        if let Ok(mut executed) = self.executed.lock() {
            executed.push(command);
        }

        let output = self
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(CommandOutput {
                status: Some(0),
                ..Default::default()
            });
        Ok(output)
    }
}
