//! cmdtoy configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high -> low):
//! 1. --config FILE
//! 2. $XDG_CONFIG_HOME/cmdtoy/config.toml
//! 3. ~/.config/cmdtoy/config.toml
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use cmdtoy::util::config::load_config;
//!
//! let config = load_config(None).unwrap();
//! assert_eq!(config.runtime.max_line_length, 8191);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::util::logger::LogLevel;

#[cfg(test)]
mod tests;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ToyConfig {
    /// Console settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
    /// Module selection
    #[serde(default)]
    pub modules: ModulesConfig,
}

/// Console configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Printed before each input line when non-empty
    #[serde(default)]
    pub prompt: String,
    /// Longest accepted input line, in bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Keep line-editor history
    #[serde(default = "default_history")]
    pub history: bool,
}

fn default_max_line_length() -> usize {
    8191
}

fn default_history() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            max_line_length: default_max_line_length(),
            history: default_history(),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// One of `debug`, `info`, `warn`, `error`
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// Parsed level.
    pub fn level(&self) -> Result<LogLevel, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::InvalidLogLevel(self.level.clone()))
    }
}

/// Module configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModulesConfig {
    /// Built-in modules loaded at start-up, by name
    #[serde(default = "default_builtins")]
    pub builtins: Vec<String>,
    /// Plugin images loaded after start-up
    #[serde(default)]
    pub autoload: Vec<PathBuf>,
}

fn default_builtins() -> Vec<String> {
    ["cmd_exit", "cmd_help", "cmd_load", "cmd_scope", "get_user_input"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            builtins: default_builtins(),
            autoload: Vec::new(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error in '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("cmdtoy"));
    }

    // Fallback to ~/.config/cmdtoy
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("cmdtoy"));
    }

    None
}

/// Get the user config file path (~/.config/cmdtoy/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Parse a configuration file.
pub fn load_config_file(path: &Path) -> Result<ToyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ToyConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.log.level()?;
    Ok(config)
}

/// Load configuration from `explicit`, else the user config file.
/// Returns the default config if no file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<ToyConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_config_file(path);
    }
    match get_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(ToyConfig::default()),
    }
}
