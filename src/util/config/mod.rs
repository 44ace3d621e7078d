//! inline-worker configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (INLINE_WORKER_*)
//! 2. Config file (explicit path, or inline-worker.toml in the working directory)
//! 3. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! [arena]
//! capacity = 128
//!
//! [context]
//! name_prefix = "inline-worker"
//! stack_size = 2097152
//!
//! [cancellation]
//! mode = "pooled"
//! shared_memory = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::runtime::cancel::{TokenMode, DEFAULT_CAPACITY};

/// File looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "inline-worker.toml";

pub const ENV_TOKEN_MODE: &str = "INLINE_WORKER_TOKEN_MODE";
pub const ENV_SHARED_MEMORY: &str = "INLINE_WORKER_SHARED_MEMORY";
pub const ENV_STACK_SIZE: &str = "INLINE_WORKER_STACK_SIZE";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WorkerConfig {
    /// Token arena settings
    #[serde(default)]
    pub arena: ArenaConfig,
    /// Execution context settings
    #[serde(default)]
    pub context: ContextConfig,
    /// Cancellation settings
    #[serde(default)]
    pub cancellation: CancellationConfig,
}

/// Token arena configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Number of pooled cancellation slots
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Execution context configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Prefix of context thread names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Stack size of context threads, in bytes
    #[serde(default = "default_stack_size")]
    pub stack_size: usize,
    /// Whether contexts may be created at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_name_prefix() -> String {
    "inline-worker".to_string()
}

fn default_stack_size() -> usize {
    2 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            stack_size: default_stack_size(),
            enabled: true,
        }
    }
}

/// Cancellation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationConfig {
    /// Token construction mode
    #[serde(default)]
    pub mode: TokenMode,
    /// Whether flag memory may be shared with contexts
    #[serde(default = "default_true")]
    pub shared_memory: bool,
}

impl Default for CancellationConfig {
    fn default() -> Self {
        Self {
            mode: TokenMode::default(),
            shared_memory: true,
        }
    }
}

impl WorkerConfig {
    /// Parse a TOML document. Missing sections take their defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse `path`.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::parse(&content)
    }

    /// Apply overrides read through `lookup`, keyed by environment
    /// variable name.
    pub fn apply_overrides<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TOKEN_MODE) {
            self.cancellation.mode = value
                .parse()
                .map_err(|reason| invalid(ENV_TOKEN_MODE, &value, reason))?;
        }

        if let Some(value) = lookup(ENV_SHARED_MEMORY) {
            self.cancellation.shared_memory = parse_flag(&value)
                .ok_or_else(|| invalid(ENV_SHARED_MEMORY, &value, "expected a boolean"))?;
        }

        if let Some(value) = lookup(ENV_STACK_SIZE) {
            self.context.stack_size = value
                .trim()
                .parse()
                .map_err(|_| invalid(ENV_STACK_SIZE, &value, "expected a byte count"))?;
        }

        self.validate()
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena.capacity == 0 {
            return Err(invalid("arena.capacity", "0", "must be at least 1"));
        }
        if self.context.stack_size == 0 {
            return Err(invalid("context.stack_size", "0", "must be at least 1"));
        }
        if self.context.name_prefix.trim().is_empty() {
            return Err(invalid(
                "context.name_prefix",
                &self.context.name_prefix,
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(
    key: &str,
    value: &str,
    reason: impl Into<String>,
) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Get the config file looked up in the working directory
pub fn default_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Load configuration
///
/// Reads `path` if given (it must exist), otherwise `inline-worker.toml` in
/// the working directory if present, otherwise the defaults. Environment
/// overrides are applied last.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => WorkerConfig::from_path(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => WorkerConfig::from_path(&path)?,
            _ => WorkerConfig::default(),
        },
    };

    config.apply_env()?;
    Ok(config)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[source] std::io::Error),

    #[error("Config parse error: {0}")]
    ParseError(#[source] toml::de::Error),

    #[error("Config serialize error: {0}")]
    SerializeError(#[source] toml::ser::Error),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}
