//! Configuration management.
//!
//! Values are merged from several sources, highest priority last:
//!
//! 1. Built-in defaults
//! 2. The user's `config.toml` (in the platform config directory, or `PYX_CONFIG_DIR`)
//! 3. The project's `pyx.toml`
//! 4. Environment variables (`PYX_CACHE_DIR`, `PYX_MAX_WORKERS`, `PYX_PARALLEL`,
//!    `PYX_NO_BINARY`, `PYX_ONLY_BINARY`, `PYX_MAX_RETRIES`, `PYX_VIRTUALENVS_PATH`)
//!
//! ```rust,no_run
//! use pyx_pm::config::Config;
//! use std::path::Path;
//!
//! let config = Config::build(Some(Path::new("/path/to/project")), true).unwrap();
//! println!("Cache dir: {:?}", config.get_cache_dir());
//! ```

mod config;
mod source;

pub use config::{Config, VirtualenvsConfig};
pub use source::{env_var_name, ConfigLoader, ConfigSource, RawConfig, PROJECT_CONFIG_FILE};
