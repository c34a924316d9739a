//! Cache configuration via `wsmodel.toml`
//!
//! Settings that shape how the cache is written and checked. A default
//! file is created on first use; edit it and restart to change behaviour.

use crate::error::{CacheError, Result};
use crate::format::CACHE_FORMAT_VERSION;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed next to the cache.
pub const CONFIG_FILE_NAME: &str = "wsmodel.toml";

/// Default cache file name.
pub const DEFAULT_CACHE_FILE_NAME: &str = "workspace-model.cache";

/// Default stream buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// When restored stores get a full consistency pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyCheck {
    /// Never
    Off,
    /// Only while `trace` logging is enabled
    Trace,
    /// After every load
    Always,
}

impl ConsistencyCheck {
    /// Whether the check should run now
    pub fn is_active(self) -> bool {
        match self {
            ConsistencyCheck::Off => false,
            ConsistencyCheck::Trace => tracing::enabled!(tracing::Level::TRACE),
            ConsistencyCheck::Always => true,
        }
    }
}

/// Cache configuration loaded from `wsmodel.toml`.
///
/// # Example
///
/// ```toml
/// # Consistency pass after load: "off", "trace" (default) or "always"
/// consistency_check = "trace"
/// cache_file_name = "workspace-model.cache"
/// buffer_size = 65536
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Overrides the format version tag. Only useful in tests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    /// Consistency pass mode: `"off"`, `"trace"` or `"always"`.
    #[serde(default = "default_consistency_check")]
    pub consistency_check: String,
    /// File name of the cache inside its directory.
    #[serde(default = "default_cache_file_name")]
    pub cache_file_name: String,
    /// Buffer size for cache file streams.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_consistency_check() -> String {
    "trace".to_string()
}

fn default_cache_file_name() -> String {
    DEFAULT_CACHE_FILE_NAME.to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            format_version: None,
            consistency_check: default_consistency_check(),
            cache_file_name: default_cache_file_name(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl CacheConfig {
    /// Parse the consistency check mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"off"`, `"trace"` or `"always"`.
    pub fn consistency_mode(&self) -> Result<ConsistencyCheck> {
        match self.consistency_check.as_str() {
            "off" => Ok(ConsistencyCheck::Off),
            "trace" => Ok(ConsistencyCheck::Trace),
            "always" => Ok(ConsistencyCheck::Always),
            other => Err(CacheError::InvalidConfig(format!(
                "Invalid consistency_check '{}'. Expected \"off\", \"trace\" or \"always\".",
                other
            ))),
        }
    }

    /// Format version tag written to and expected from caches
    pub fn format_version(&self) -> &str {
        self.format_version.as_deref().unwrap_or(CACHE_FORMAT_VERSION)
    }

    /// Check every field, failing on the first invalid one
    pub fn validate(&self) -> Result<()> {
        self.consistency_mode()?;
        if self.cache_file_name.is_empty()
            || self.cache_file_name.contains(['/', '\\'])
            || self.cache_file_name.starts_with('.')
        {
            return Err(CacheError::InvalidConfig(format!(
                "Invalid cache_file_name '{}'. Expected a plain file name.",
                self.cache_file_name
            )));
        }
        if self.buffer_size == 0 {
            return Err(CacheError::InvalidConfig("buffer_size must be positive".to_string()));
        }
        if matches!(self.format_version.as_deref(), Some("")) {
            return Err(CacheError::InvalidConfig("format_version must not be empty".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Workspace model cache configuration
#
# Consistency pass over stores restored from the cache:
#   "off"    = never
#   "trace"  = only while trace logging is enabled (default)
#   "always" = after every load
consistency_check = "trace"

# Cache file name inside the cache directory
cache_file_name = "workspace-model.cache"

# Stream buffer size in bytes
buffer_size = 65536

# Override the format version tag (tests only)
# format_version = "custom"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: CacheConfig = toml::from_str(&content).map_err(|e| {
            CacheError::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            CacheError::InvalidConfig(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
