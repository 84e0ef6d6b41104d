use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PyxError, Result};

/// Name of the per-project configuration file
pub const PROJECT_CONFIG_FILE: &str = "pyx.toml";

/// Represents the source of a configuration value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Default built-in value
    Default,
    /// From the user's config.toml
    Global,
    /// From the project's pyx.toml
    Project,
    /// From environment variable
    Environment(String),
    /// Programmatically set
    Command,
}

impl ConfigSource {
    pub fn as_str(&self) -> &str {
        match self {
            ConfigSource::Default => "default",
            ConfigSource::Global => "global",
            ConfigSource::Project => "project",
            ConfigSource::Environment(var) => var,
            ConfigSource::Command => "command",
        }
    }
}

/// Raw configuration as read from a TOML file
pub type RawConfig = toml::Table;

/// Loads configuration from various sources
#[derive(Debug)]
pub struct ConfigLoader {
    use_environment: bool,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self { use_environment }
    }

    /// Get a PYX_* environment variable
    pub fn get_pyx_env(&self, var: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        env::var(var).ok().filter(|s| !s.is_empty())
    }

    /// Directory holding the user's config.toml
    pub fn get_config_home(&self) -> PathBuf {
        if let Some(home) = self.get_pyx_env("PYX_CONFIG_DIR") {
            return PathBuf::from(home);
        }

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "pyx") {
            proj_dirs.config_dir().to_path_buf()
        } else if let Some(base_dirs) = directories::BaseDirs::new() {
            base_dirs.home_dir().join(".pyx")
        } else {
            PathBuf::from(".pyx")
        }
    }

    /// Get the cache directory
    pub fn get_cache_dir(&self) -> PathBuf {
        if let Some(cache) = self.get_pyx_env("PYX_CACHE_DIR") {
            return PathBuf::from(shellexpand::tilde(&cache).into_owned());
        }

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "pyx") {
            proj_dirs.cache_dir().to_path_buf()
        } else {
            self.get_config_home().join("cache")
        }
    }

    /// Load configuration from a TOML file; a missing file is empty
    pub fn load_config_file<P: AsRef<Path>>(&self, path: P) -> Result<RawConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(RawConfig::new());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| PyxError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        contents
            .parse::<RawConfig>()
            .map_err(|e| PyxError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load the user's config.toml
    pub fn load_global_config(&self) -> Result<RawConfig> {
        self.load_config_file(self.get_config_home().join("config.toml"))
    }

    /// Load the project's pyx.toml
    pub fn load_project_config<P: AsRef<Path>>(&self, project_dir: P) -> Result<RawConfig> {
        self.load_config_file(project_dir.as_ref().join(PROJECT_CONFIG_FILE))
    }

    /// Get a configuration value from environment variable.
    /// Converts "max-workers" to "PYX_MAX_WORKERS"
    pub fn get_env_config(&self, key: &str) -> Option<String> {
        let env_var = env_var_name(key);
        self.get_pyx_env(&env_var)
    }

    /// Get boolean value from environment variable
    pub fn get_env_bool(&self, key: &str) -> Option<bool> {
        self.get_env_config(key)
            .map(|val| !matches!(val.to_lowercase().as_str(), "false" | "0" | "no" | "off"))
    }

    /// Get unsigned integer value from environment variable
    pub fn get_env_u64(&self, key: &str) -> Option<u64> {
        self.get_env_config(key).and_then(|val| val.parse().ok())
    }

    /// Get a comma separated list from environment variable
    pub fn get_env_list(&self, key: &str) -> Option<Vec<String>> {
        self.get_env_config(key).map(|val| {
            val.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Get a path value from environment variable
    pub fn get_env_path(&self, key: &str) -> Option<PathBuf> {
        self.get_env_config(key)
            .map(|val| PathBuf::from(shellexpand::tilde(&val).into_owned()))
    }
}

/// Environment variable for a config key: "virtualenvs.path" -> "PYX_VIRTUALENVS_PATH"
pub fn env_var_name(key: &str) -> String {
    format!("PYX_{}", key.replace(['-', '.'], "_").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_source_as_str() {
        assert_eq!(ConfigSource::Default.as_str(), "default");
        assert_eq!(ConfigSource::Global.as_str(), "global");
        assert_eq!(ConfigSource::Project.as_str(), "project");
        assert_eq!(ConfigSource::Command.as_str(), "command");
        assert_eq!(ConfigSource::Environment("PYX_CACHE_DIR".to_string()).as_str(), "PYX_CACHE_DIR");
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("max-workers"), "PYX_MAX_WORKERS");
        assert_eq!(env_var_name("virtualenvs.path"), "PYX_VIRTUALENVS_PATH");
    }

    #[test]
    fn test_env_disabled() {
        let loader = ConfigLoader::new(false);
        assert_eq!(loader.get_pyx_env("PATH"), None);
        assert_eq!(loader.get_env_config("cache-dir"), None);
    }

    #[test]
    fn test_load_config_file() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::new(false);

        let missing = loader.load_config_file(temp.path().join("config.toml")).unwrap();
        assert!(missing.is_empty());

        std::fs::write(temp.path().join("pyx.toml"), "max-workers = 2\n").unwrap();
        let raw = loader.load_project_config(temp.path()).unwrap();
        assert_eq!(raw["max-workers"].as_integer(), Some(2));

        std::fs::write(temp.path().join("broken.toml"), "installer = [").unwrap();
        let result = loader.load_config_file(temp.path().join("broken.toml"));
        assert!(matches!(result, Err(PyxError::Config(_))));
    }
}
