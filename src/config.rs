//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::ExecutionPolicy;
use crate::job::LimitPolicy;
use crate::model::Style;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Job compilation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompilerConfig {
    /// Default limit is `10^(facets + offset)`
    #[serde(default = "default_limit_exponent_offset")]
    pub limit_exponent_offset: u32,

    #[serde(default = "default_limit_cap")]
    pub limit_cap: u64,

    /// Style used when a request sets none
    #[serde(default)]
    pub default_style: Style,
}

fn default_limit_exponent_offset() -> u32 {
    1
}

fn default_limit_cap() -> u64 {
    100_000
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            limit_exponent_offset: default_limit_exponent_offset(),
            limit_cap: default_limit_cap(),
            default_style: Style::default(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    pub default_timeout_ms: Option<u64>,

    #[serde(default = "default_min_wait")]
    pub min_wait_ms: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_tenant: usize,

    #[serde(default = "default_retry_after_factor")]
    pub retry_after_factor: u64,

    /// Lifetime of cached results, 0 keeps them until cleared
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_min_wait() -> u64 {
    1000 // 1 second
}

fn default_max_concurrent() -> usize {
    4
}

fn default_retry_after_factor() -> u64 {
    2
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            min_wait_ms: default_min_wait(),
            max_concurrent_per_tenant: default_max_concurrent(),
            retry_after_factor: default_retry_after_factor(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("prism").join("config.toml")),
            Some(PathBuf::from("/etc/prism/config.toml")),
            Some(PathBuf::from("./prism.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Compiler overrides
        if let Some(cap) = var("PRISM_LIMIT_CAP").and_then(|v| v.parse().ok()) {
            self.compiler.limit_cap = cap;
        }

        // Execution overrides
        if let Some(timeout) = var("PRISM_DEFAULT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.execution.default_timeout_ms = Some(timeout);
        }
        if let Some(max) = var("PRISM_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.execution.max_concurrent_per_tenant = max;
        }
        if let Some(ttl) = var("PRISM_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.execution.cache_ttl_secs = ttl;
        }

        // Logging overrides
        if let Some(level) = var("PRISM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("PRISM_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn limit_policy(&self) -> LimitPolicy {
        LimitPolicy {
            exponent_offset: self.compiler.limit_exponent_offset,
            cap: self.compiler.limit_cap,
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            default_timeout_ms: self.execution.default_timeout_ms,
            min_wait_ms: self.execution.min_wait_ms,
            retry_after_factor: self.execution.retry_after_factor,
        }
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.execution.cache_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Prism Configuration
#
# Environment variables override these settings:
# - PRISM_LIMIT_CAP
# - PRISM_DEFAULT_TIMEOUT_MS
# - PRISM_MAX_CONCURRENT
# - PRISM_CACHE_TTL_SECS
# - PRISM_LOG_LEVEL
# - PRISM_LOG_FORMAT

[compiler]
# Default row limit for JSON output is 10^(facets + limit_exponent_offset)
limit_exponent_offset = 1

# Upper bound of the default row limit
limit_cap = 100000

# Display style when a request sets none: human, robot or legacy
default_style = "human"

[execution]
# Timeout applied when a request sets none (ms)
# default_timeout_ms = 30000

# Every wait lasts at least this long (ms)
min_wait_ms = 1000

# Concurrent computations per tenant
max_concurrent_per_tenant = 4

# Suggested retry-after as a multiple of the timeout
retry_after_factor = 2

# Lifetime of cached results (seconds, 0 = until cleared)
cache_ttl_secs = 3600

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/prism/prism.log"
"#
    .to_string()
}
