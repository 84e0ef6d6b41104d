use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::source::{env_var_name, ConfigLoader, ConfigSource, RawConfig};
use crate::error::{PyxError, Result};
use crate::http::HttpClientConfig;

/// Where virtual environments are created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct VirtualenvsConfig {
    /// Directory holding one environment per project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Create the environment as `.venv` inside the project
    #[serde(default)]
    pub in_project: bool,
}

/// Installer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Upper bound for parallel operations; unset uses the hardware default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,

    #[serde(default = "default_true")]
    pub parallel: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Packages always built from source, `:all:` for every package
    #[serde(default)]
    pub no_binary: Vec<String>,

    /// Packages never built from source, `:all:` for every package
    #[serde(default)]
    pub only_binary: Vec<String>,

    #[serde(default)]
    pub virtualenvs: VirtualenvsConfig,

    #[serde(default)]
    pub verbose: bool,

    #[serde(skip)]
    base_dir: Option<PathBuf>,

    #[serde(skip)]
    sources: HashMap<String, ConfigSource>,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: None,
            max_workers: None,
            parallel: true,
            max_retries: default_max_retries(),
            no_binary: Vec::new(),
            only_binary: Vec::new(),
            virtualenvs: VirtualenvsConfig::default(),
            verbose: false,
            base_dir: None,
            sources: HashMap::new(),
        }
    }
}

impl Config {
    /// Create a new Config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Config with defaults and base directory
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        let mut config = Self::default();
        config.base_dir = Some(base_dir.as_ref().to_path_buf());
        config
    }

    /// Build configuration from all sources (defaults, global, project, env)
    pub fn build<P: AsRef<Path>>(project_dir: Option<P>, use_environment: bool) -> Result<Self> {
        let loader = ConfigLoader::new(use_environment);
        let mut config = Self::default();

        if let Some(ref dir) = project_dir {
            config.base_dir = Some(dir.as_ref().to_path_buf());
        }

        for key in Self::config_keys() {
            config.sources.insert(key.to_string(), ConfigSource::Default);
        }

        // 1. The user's config.toml
        let global_config = loader.load_global_config()?;
        config.merge_raw_config(global_config, ConfigSource::Global)?;

        // 2. The project's pyx.toml
        if let Some(project_dir) = &project_dir {
            let project_config = loader.load_project_config(project_dir)?;
            config.merge_raw_config(project_config, ConfigSource::Project)?;
        }

        // 3. PYX_* environment variables
        if use_environment {
            config.apply_env_overrides(&loader);
        }

        // 4. Computed paths
        config.resolve_paths(&loader);

        log::debug!("Using cache directory {}", config.get_cache_dir().display());

        Ok(config)
    }

    /// Get base directory
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Get the source of a configuration value
    pub fn get_source(&self, key: &str) -> Option<&ConfigSource> {
        self.sources.get(key)
    }

    /// Set a value from the command line
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let parsed = if let Ok(flag) = value.parse::<bool>() {
            toml::Value::Boolean(flag)
        } else if let Ok(number) = value.parse::<i64>() {
            toml::Value::Integer(number)
        } else {
            toml::Value::String(value.to_string())
        };
        self.merge_config_value(key, &parsed, ConfigSource::Command)
    }

    /// Get cache directory (resolved as absolute path)
    pub fn get_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(cache_dir) => self.resolve_path(cache_dir),
            None => ConfigLoader::new(false).get_cache_dir(),
        }
    }

    /// Where the environment of a project lives
    pub fn get_virtualenv_path(&self, project_dir: &Path, project_name: &str) -> PathBuf {
        if self.virtualenvs.in_project {
            return project_dir.join(".venv");
        }
        let base = match &self.virtualenvs.path {
            Some(path) => self.resolve_path(path),
            None => self.get_cache_dir().join("virtualenvs"),
        };
        base.join(crate::util::canonicalize_name(project_name))
    }

    /// HTTP settings derived from this configuration
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig::new().with_max_retries(self.max_retries)
    }

    /// Resolve a path relative to base_dir if not absolute
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(ref base) = self.base_dir {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// Merge raw configuration from a source
    fn merge_raw_config(&mut self, raw: RawConfig, source: ConfigSource) -> Result<()> {
        for (key, value) in raw {
            match (key.as_str(), &value) {
                ("virtualenvs", toml::Value::Table(table)) => {
                    for (sub_key, sub_value) in table {
                        self.merge_config_value(&format!("virtualenvs.{}", sub_key), sub_value, source.clone())?;
                    }
                }
                _ => self.merge_config_value(&key, &value, source.clone())?,
            }
        }
        Ok(())
    }

    /// Merge a single configuration value
    fn merge_config_value(&mut self, key: &str, value: &toml::Value, source: ConfigSource) -> Result<()> {
        match key {
            "cache-dir" => self.cache_dir = Some(PathBuf::from(expect_str(key, value)?)),
            "max-workers" => {
                let workers = expect_int(key, value)?;
                if workers < 1 {
                    return Err(PyxError::Config(format!("{} must be at least 1", key)));
                }
                self.max_workers = Some(workers as usize);
            }
            "parallel" => self.parallel = expect_bool(key, value)?,
            "max-retries" => self.max_retries = expect_int(key, value)? as u32,
            "no-binary" => self.no_binary = expect_list(key, value)?,
            "only-binary" => self.only_binary = expect_list(key, value)?,
            "verbose" => self.verbose = expect_bool(key, value)?,
            "virtualenvs.path" => self.virtualenvs.path = Some(PathBuf::from(expect_str(key, value)?)),
            "virtualenvs.in-project" => self.virtualenvs.in_project = expect_bool(key, value)?,
            _ => {
                log::debug!("Ignoring unknown config key {}", key);
                return Ok(());
            }
        }
        self.sources.insert(key.to_string(), source);
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self, loader: &ConfigLoader) {
        let record = |config: &mut Self, key: &str| {
            config
                .sources
                .insert(key.to_string(), ConfigSource::Environment(env_var_name(key)));
        };

        if let Some(cache_dir) = loader.get_env_path("cache-dir") {
            self.cache_dir = Some(cache_dir);
            record(self, "cache-dir");
        }

        if let Some(workers) = loader.get_env_u64("max-workers").filter(|w| *w > 0) {
            self.max_workers = Some(workers as usize);
            record(self, "max-workers");
        }

        if let Some(parallel) = loader.get_env_bool("parallel") {
            self.parallel = parallel;
            record(self, "parallel");
        }

        if let Some(retries) = loader.get_env_u64("max-retries") {
            self.max_retries = retries as u32;
            record(self, "max-retries");
        }

        if let Some(no_binary) = loader.get_env_list("no-binary") {
            self.no_binary = no_binary;
            record(self, "no-binary");
        }

        if let Some(only_binary) = loader.get_env_list("only-binary") {
            self.only_binary = only_binary;
            record(self, "only-binary");
        }

        if let Some(path) = loader.get_env_path("virtualenvs.path") {
            self.virtualenvs.path = Some(path);
            record(self, "virtualenvs.path");
        }
    }

    /// Resolve computed paths
    fn resolve_paths(&mut self, loader: &ConfigLoader) {
        match &self.cache_dir {
            Some(cache_dir) => self.cache_dir = Some(self.resolve_path(cache_dir)),
            None => self.cache_dir = Some(loader.get_cache_dir()),
        }
    }

    /// Get all configuration keys
    fn config_keys() -> &'static [&'static str] {
        &[
            "cache-dir",
            "max-workers",
            "parallel",
            "max-retries",
            "no-binary",
            "only-binary",
            "verbose",
            "virtualenvs.path",
            "virtualenvs.in-project",
        ]
    }
}

fn type_error(key: &str, expected: &str) -> PyxError {
    PyxError::Config(format!("{} must be {}", key, expected))
}

fn expect_str<'a>(key: &str, value: &'a toml::Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| type_error(key, "a string"))
}

fn expect_int(key: &str, value: &toml::Value) -> Result<i64> {
    match value {
        toml::Value::Integer(i) if *i >= 0 => Ok(*i),
        _ => Err(type_error(key, "a non-negative integer")),
    }
}

fn expect_bool(key: &str, value: &toml::Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| type_error(key, "a boolean"))
}

fn expect_list(key: &str, value: &toml::Value) -> Result<Vec<String>> {
    match value {
        toml::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| type_error(key, "a list of strings")))
            .collect(),
        toml::Value::String(s) => Ok(s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()),
        _ => Err(type_error(key, "a list of strings")),
    }
}
