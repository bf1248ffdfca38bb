//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level strata configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Streaming engine settings.
    pub streaming: StreamingConfig,
    /// Durable store settings.
    pub store: StoreConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// Streaming engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Number of background I/O worker threads. `0` means auto: the CPU
    /// count minus two, clamped to at least one.
    pub worker_threads: usize,
    /// Horizontal view distance in chunk units. Chunks whose horizontal
    /// chunk-center distance to a viewer is within this value stay loaded.
    pub view_distance: f64,
    /// Vertical band in chunks kept loaded above and below each viewer,
    /// independent of the horizontal view distance.
    pub vertical_band: u32,
    /// Chunk edge length in world units (meters).
    pub chunk_edge_m: f64,
    /// Recompute the desired chunk set every this many ticks.
    pub view_refresh_ticks: u32,
    /// Run the LRU eviction sweep every this many ticks.
    pub eviction_sweep_ticks: u32,
    /// Whether dirty chunks are periodically flushed in the background.
    pub auto_save: bool,
    /// Seconds between auto-save passes.
    pub auto_save_interval_secs: f32,
    /// Maximum number of chunks kept in memory before eviction kicks in.
    pub max_cached_chunks: usize,
    /// Maximum number of queued I/O requests; further requests are
    /// rejected until the queue drains.
    pub max_queued_requests: usize,
    /// Capacity of the bounded event channel drained by the owner thread.
    pub event_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            view_distance: 8.0,
            vertical_band: 2,
            chunk_edge_m: 32.0,
            view_refresh_ticks: 4,
            eviction_sweep_ticks: 32,
            auto_save: true,
            auto_save_interval_secs: 30.0,
            max_cached_chunks: 4096,
            max_queued_requests: 4096,
            event_capacity: 1024,
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for the chunk store. `None` resolves to the
    /// platform data directory.
    pub world_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolves the chunk store root: the configured `world_dir`, or the
    /// platform data directory (`strata/world`), or `./strata-world` when
    /// the platform reports no data directory.
    pub fn resolve_world_dir(&self) -> PathBuf {
        if let Some(dir) = &self.world_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("strata").join("world"))
            .unwrap_or_else(|| PathBuf::from("strata-world"))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log filter override (e.g., "debug", "info,strata_streamer=trace").
    /// Empty means the built-in default.
    pub log_level: String,
    /// Also write structured JSON logs to a file in debug builds.
    pub log_to_file: bool,
    /// Directory for JSON log files. `None` means `./logs`.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
            log_dir: None,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
