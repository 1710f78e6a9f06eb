//! Configuration module.
//!
//! Handles loading and validating `webfs.toml`. Stock defaults are the base
//! layer, the config file (if present) goes on top, and command-line flags
//! go on top of that.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! mount = "."                # Directory tree to expose
//!
//! [cache]
//! dir = "~/.cache/webfs"     # Thumbnail directory; "" keeps thumbnails in memory
//!
//! [thumbnails]
//! width = 140                # Bounding box for generated thumbnails
//! height = 140
//! quality = 85               # JPEG quality (1-100)
//! mosaic_depth = 1           # Directory levels a mosaic may render below itself
//!
//! [tools]
//! timeout_secs = 30          # Wall-clock limit for inkscape / ffmpeg / ffprobe
//!
//! [processing]
//! max_processes = 4          # Pregeneration workers (omit for auto = half the cores)
//! ```
//!
//! A leading `~` in a path expands to `$HOME`. Unknown keys are rejected to
//! catch typos early.

use crate::cache::{Cache, CacheError, DiskCache, MemoryCache};
use crate::thumb::{Quality, Size};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `webfs.toml`.
///
/// All fields have sensible defaults. Config files need only specify the
/// values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the directory tree to serve.
    pub mount: String,
    /// Where generated thumbnails are kept.
    pub cache: CacheConfig,
    /// Thumbnail size, quality and mosaic depth.
    pub thumbnails: ThumbnailConfig,
    /// External tool settings.
    pub tools: ToolsConfig,
    /// Parallel pregeneration settings.
    pub processing: ProcessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount: ".".to_string(),
            cache: CacheConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            tools: ToolsConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mount.is_empty() {
            return Err(ConfigError::Validation("mount must not be empty".into()));
        }
        if self.thumbnails.width == 0 || self.thumbnails.height == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.width and thumbnails.height must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.thumbnails.quality) {
            return Err(ConfigError::Validation(
                "thumbnails.quality must be 1-100".into(),
            ));
        }
        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "tools.timeout_secs must be non-zero".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The mount directory with `~` expanded.
    pub fn mount_path(&self) -> PathBuf {
        expand_home(&self.mount)
    }
}

/// Thumbnail storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache directory. Empty keeps everything in memory.
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: "~/.cache/webfs".to_string(),
        }
    }
}

impl CacheConfig {
    /// The cache directory with `~` expanded, or `None` for a memory cache.
    pub fn path(&self) -> Option<PathBuf> {
        (!self.dir.is_empty()).then(|| expand_home(&self.dir))
    }

    /// Open the configured backend.
    pub fn open(&self) -> Result<Arc<dyn Cache>, CacheError> {
        Ok(match self.path() {
            Some(dir) => Arc::new(DiskCache::open(dir)?),
            None => Arc::new(MemoryCache::new()),
        })
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1-100).
    pub quality: u32,
    /// How many directory levels a mosaic may render below itself.
    pub mosaic_depth: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 140,
            height: 140,
            quality: 85,
            mosaic_depth: crate::thumb::DEFAULT_MAX_DEPTH,
        }
    }
}

impl ThumbnailConfig {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.quality)
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Seconds an external tool may run before it is killed.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of pregeneration workers.
    /// When absent or null, defaults to half the CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → half the available cores, at least one
/// - `Some(n)` → `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.min(cores))
        .unwrap_or(cores / 2)
        .max(1)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Config::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge layers onto the stock defaults in order, then deserialize and
/// validate.
pub fn resolve_config(
    layers: impl IntoIterator<Item = toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = layers
        .into_iter()
        .fold(stock_defaults_value()?, merge_toml);
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path` (if it exists) with `overrides` applied on top.
pub fn load_config(path: &Path, overrides: Option<toml::Value>) -> Result<Config, ConfigError> {
    let file = load_raw_config(path)?;
    resolve_config(file.into_iter().chain(overrides))
}

/// Returns a fully-commented stock `webfs.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# webfs Configuration
# ===================
# All options are optional. Values shown are the defaults.
# Unknown keys will cause an error.

# Directory tree to expose. A leading "~" expands to your home directory.
mount = "."

# ---------------------------------------------------------------------------
# Thumbnail cache
# ---------------------------------------------------------------------------
[cache]
# Directory holding generated thumbnails. Files are named after a hash of the
# source path plus the thumbnail size, and survive restarts.
# Set to "" to keep thumbnails in memory only.
dir = "~/.cache/webfs"

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# Bounding box in pixels. Thumbnails keep their aspect ratio and fit inside.
width = 140
height = 140

# JPEG quality (1-100).
quality = 85

# Directory mosaics tile thumbnails of their children. This limits how many
# directory levels a mosaic may render below itself. At 1, subdirectories
# are left out of their parent's mosaic.
mosaic_depth = 1

# ---------------------------------------------------------------------------
# External tools
# ---------------------------------------------------------------------------
# Vector documents are rasterized with inkscape, videos with ffmpeg/ffprobe.
# Each is optional: a missing tool disables that kind of thumbnail.
[tools]
# Seconds a tool may run before it is killed.
timeout_secs = 30

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `webfs pregen`.
# Omit to use half the CPU cores. Values above the core count are clamped.
# max_processes = 4
"##
}
