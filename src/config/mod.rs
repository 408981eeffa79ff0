//! Configuration module for ionflow
//!
//! This module handles engine configuration:
//! - Cache budget (share of RAM, policy once full)
//! - Refresh scheduling (monitor interval, abort polling stride)
//! - Undo history depth
//! - Per-type default filter templates
//!
//! # App Data Location
//!
//! The configuration file is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.ionflow.engine/`
//! - **macOS**: `~/Library/Application Support/dev.ionflow.engine/`
//! - **Windows**: `%APPDATA%\dev.ionflow.engine\`
//!
//! # Files
//!
//! - `engine.toml` - Engine configuration
//!
//! # Example
//!
//! ```ignore
//! use ionflow::config::EngineConfig;
//!
//! let config = EngineConfig::load_or_default();
//! let mut tree = config.new_tree();
//! ```

pub mod defaults;

pub use defaults::{DefaultsError, FilterDefaults};

use crate::error::{EngineError, Result};
use crate::pipeline::cache::{CacheBudget, CachePolicy};
use crate::pipeline::context::DEFAULT_ABORT_POLL_STRIDE;
use crate::pipeline::history::DEFAULT_MAX_UNDO_DEPTH;
use crate::pipeline::tree::FilterTree;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.ionflow.engine";

/// Engine configuration filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Default share of RAM given to filter caches
pub const DEFAULT_CACHE_PERCENT: f32 = 50.0;

/// Default monitor polling interval in milliseconds
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 50;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        EngineError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            EngineError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the engine configuration file
pub fn config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Cache ====================

/// Limits on how much memory filter caches may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Master switch; when off nothing is cached
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Share of available RAM, `0..=100`
    #[serde(default = "default_cache_percent")]
    pub percent_of_ram: f32,

    /// Behaviour once the budget is exhausted
    #[serde(default)]
    pub policy: CachePolicy,

    /// Use this RAM size instead of asking the OS
    #[serde(default)]
    pub assumed_ram_bytes: Option<u64>,
}

fn default_true() -> bool {
    true
}

fn default_cache_percent() -> f32 {
    DEFAULT_CACHE_PERCENT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            percent_of_ram: DEFAULT_CACHE_PERCENT,
            policy: CachePolicy::default(),
            assumed_ram_bytes: None,
        }
    }
}

// ==================== Refresh ====================

/// Scheduling of refreshes by the analysis session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// How often the session asks filters whether their inputs changed
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Items processed between abort checks in long loops
    #[serde(default = "default_abort_poll_stride")]
    pub abort_poll_stride: usize,
}

fn default_monitor_interval_ms() -> u64 {
    DEFAULT_MONITOR_INTERVAL_MS
}

fn default_abort_poll_stride() -> usize {
    DEFAULT_ABORT_POLL_STRIDE
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            abort_poll_stride: DEFAULT_ABORT_POLL_STRIDE,
        }
    }
}

impl RefreshConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

// ==================== History ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Undo steps kept per tree; 0 disables undo
    #[serde(default = "default_max_undo_depth")]
    pub max_undo_depth: usize,
}

fn default_max_undo_depth() -> usize {
    DEFAULT_MAX_UNDO_DEPTH
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_undo_depth: DEFAULT_MAX_UNDO_DEPTH,
        }
    }
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    /// Templates applied to newly created filters
    #[serde(default, skip_serializing_if = "FilterDefaults::is_empty")]
    pub defaults: FilterDefaults,
}

fn default_config_version() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            cache: CacheConfig::default(),
            refresh: RefreshConfig::default(),
            history: HistoryConfig::default(),
            defaults: FilterDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse config {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, returning defaults on
    /// any error or when no file exists yet
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            tracing::warn!("Could not determine config path, using defaults");
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = ensure_app_data_dir()?.join(CONFIG_FILE);
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save configuration to a TOML file
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config {:?}: {}", path, e))
        })?;
        tracing::debug!("Saved engine config to {:?}", path);
        Ok(())
    }

    /// Reject values that cannot be meant
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.cache.percent_of_ram) {
            return Err(EngineError::Config(format!(
                "cache.percent_of_ram must be within 0..=100, got {}",
                self.cache.percent_of_ram
            )));
        }
        if self.refresh.abort_poll_stride == 0 {
            return Err(EngineError::Config(
                "refresh.abort_poll_stride must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// A fresh cache budget sized by this configuration.
    pub fn cache_budget(&self) -> Arc<CacheBudget> {
        CacheBudget::from_config(&self.cache).shared()
    }

    /// An empty tree using a fresh budget and the configured undo depth.
    pub fn new_tree(&self) -> FilterTree {
        FilterTree::new(self.cache_budget()).with_max_undo_depth(self.history.max_undo_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [cache]
            percent_of_ram = 10.0
            policy = "skip_oversized"
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.percent_of_ram, 10.0);
        assert_eq!(config.cache.policy, CachePolicy::SkipOversized);
        assert!(config.cache.enabled);
        assert_eq!(config.refresh, RefreshConfig::default());
        assert_eq!(config.history.max_undo_depth, DEFAULT_MAX_UNDO_DEPTH);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = EngineConfig::default();
        config.cache.assumed_ram_bytes = Some(1 << 30);
        config.history.max_undo_depth = 3;
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_percentage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[cache]\npercent_of_ram = 150.0\n").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_new_tree_uses_history_depth() {
        let mut config = EngineConfig::default();
        config.history.max_undo_depth = 2;
        config.cache.assumed_ram_bytes = Some(1 << 20);
        let tree = config.new_tree();
        assert_eq!(tree.max_undo_depth(), 2);
        assert_eq!(tree.budget().limit_bytes(), 1 << 19);
    }

    #[test]
    #[serial]
    fn test_load_or_default_never_fails() {
        let config = EngineConfig::load_or_default();
        assert!(config.validate().is_ok());
    }
}
