//! Configuration management for Engram.
//!
//! Configuration is stored in TOML format in a platform-appropriate
//! location. All sections have working defaults; an absent file yields a
//! default configuration.
//!
//! ## Example Configuration File (engram.toml)
//!
//! ```toml
//! [monitor]
//! interval_secs = 1
//! queue_size = 10000
//! include_close_events = true
//!
//! [tiers]
//! hot_ttl_days = 4
//! warm_ttl_days = 30
//! age_threshold_hours = 12
//!
//! [volumes]
//! include = ["C:"]
//!
//! [exclude]
//! path_prefixes = ["$RECYCLE.BIN"]
//! extensions = ["tmp", "etl"]
//! ```

use crate::error::{EngramError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure for Engram.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Journal monitoring settings
    pub monitor: MonitorConfig,

    /// Tier retention and transition settings
    pub tiers: TierConfig,

    /// Importance scoring weight overrides
    pub scoring: ScoringConfig,

    /// Volumes to monitor (empty = all NTFS volumes)
    pub volumes: VolumesConfig,

    /// Collector-side exclusion filters
    pub exclude: ExcludeConfig,

    /// Storage locations
    pub storage: StorageConfig,
}

/// Journal monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds to sleep between journal reads
    pub interval_secs: u64,

    /// Bound of the event queue between readers and the processor
    pub queue_size: usize,

    /// Whether CLOSE-only records become events
    pub include_close_events: bool,

    /// Persist the cursor every N records
    pub cursor_save_interval: u64,

    /// Use volume-GUID paths when a mapping is known
    pub use_volume_guids: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interval_secs: 1,
            queue_size: 10_000,
            include_close_events: true,
            cursor_save_interval: 100,
            use_volume_guids: true,
        }
    }
}

/// Tier retention and transition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Hot-tier retention before TTL expiry
    pub hot_ttl_days: u32,

    /// Warm-tier retention before TTL expiry
    pub warm_ttl_days: u32,

    /// Age at which hot records become transition-ready
    pub age_threshold_hours: u32,

    /// Age multiplier for high-importance records (linger longer)
    pub high_importance_age_multiplier: f64,

    /// Age multiplier for low-importance records (leave sooner)
    pub low_importance_age_multiplier: f64,

    /// Records per transition batch
    pub batch_size: usize,

    /// Batches per scheduled transition run
    pub max_batches: u32,

    /// Pause between batches within a run
    pub pause_seconds: u64,

    /// Minutes between scheduled transition runs
    pub interval_minutes: u64,

    /// Aggregation window in hours for grouping similar events
    pub aggregation_window_hours: u32,

    /// Write hot/warm JSONL snapshots for each transition run
    pub snapshots: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            hot_ttl_days: 4,
            warm_ttl_days: 30,
            age_threshold_hours: 12,
            high_importance_age_multiplier: 2.0,
            low_importance_age_multiplier: 0.5,
            batch_size: 1000,
            max_batches: 10,
            pause_seconds: 5,
            interval_minutes: 60,
            aggregation_window_hours: 6,
            snapshots: false,
        }
    }
}

/// Importance scoring weight overrides.
///
/// Weights are normalized to sum to 1.0 when the scorer is built, so
/// relative values are what matter here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub recency_weight: f64,
    pub type_weight: f64,
    pub content_weight: f64,
    pub frequency_weight: f64,
    pub novelty_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            recency_weight: 0.30,
            type_weight: 0.25,
            content_weight: 0.20,
            frequency_weight: 0.15,
            novelty_weight: 0.10,
        }
    }
}

/// Volume selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VolumesConfig {
    /// Specific volumes to monitor (empty = all NTFS volumes)
    pub include: Vec<String>,

    /// Volumes to skip
    pub exclude: Vec<String>,
}

/// Collector exclusion filters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ExcludeConfig {
    /// File-name prefixes to drop before normalization
    pub path_prefixes: Vec<String>,

    /// Extensions (without the dot) to drop
    pub extensions: Vec<String>,
}

/// Storage location configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory override (None = platform default)
    pub data_dir: Option<PathBuf>,

    /// Snapshot directory override (None = `<data_dir>/warm_snapshots`)
    pub snapshot_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| EngramError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self)
            .map_err(|e| EngramError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate cross-field constraints.
    ///
    /// A hot-tier TTL at or below the transition age threshold would let
    /// records expire before they transition, silently losing them; that
    /// configuration is refused at startup.
    pub fn validate(&self) -> Result<()> {
        let hot_ttl_hours = self.tiers.hot_ttl_days as u64 * 24;
        if hot_ttl_hours <= self.tiers.age_threshold_hours as u64 {
            return Err(EngramError::config(format!(
                "hot_ttl_days ({} days = {} h) must exceed age_threshold_hours ({} h): \
                 records would expire before transitioning",
                self.tiers.hot_ttl_days, hot_ttl_hours, self.tiers.age_threshold_hours
            )));
        }
        if self.tiers.batch_size == 0 {
            return Err(EngramError::config("batch_size must be at least 1"));
        }
        if self.tiers.aggregation_window_hours == 0 || self.tiers.aggregation_window_hours > 24 {
            return Err(EngramError::config(
                "aggregation_window_hours must be within 1..=24",
            ));
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "engram")
            .ok_or_else(|| EngramError::config("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("engram.toml"))
    }

    /// Get the data directory (from config or platform default).
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.data_dir {
            return Ok(path.clone());
        }
        let dirs = ProjectDirs::from("", "", "engram")
            .ok_or_else(|| EngramError::config("Could not determine data directory"))?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the snapshot directory.
    pub fn snapshot_dir(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.snapshot_dir {
            return Ok(path.clone());
        }
        Ok(self.data_dir()?.join("warm_snapshots"))
    }

    /// Check if a volume should be monitored.
    pub fn should_monitor_volume(&self, mount_point: &str) -> bool {
        if !self.volumes.include.is_empty() {
            return self
                .volumes
                .include
                .iter()
                .any(|v| mount_point.eq_ignore_ascii_case(v));
        }

        !self
            .volumes
            .exclude
            .iter()
            .any(|v| mount_point.eq_ignore_ascii_case(v))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tiers.hot_ttl_days, 4);
        assert_eq!(config.tiers.warm_ttl_days, 30);
        assert_eq!(config.tiers.age_threshold_hours, 12);
        assert_eq!(config.monitor.queue_size, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let mut config = Config::default();
        config.tiers.batch_size = 500;
        config.volumes.include = vec!["C:".to_string()];

        config.save_to(&config_path).unwrap();
        let loaded = Config::load_from(&config_path).unwrap();

        assert_eq!(loaded.tiers.batch_size, 500);
        assert_eq!(loaded.volumes.include, vec!["C:".to_string()]);
    }

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.tiers.hot_ttl_days, 4);
    }

    #[test]
    fn rejects_ttl_below_age_threshold() {
        let mut config = Config::default();
        config.tiers.hot_ttl_days = 1;
        config.tiers.age_threshold_hours = 24;
        assert!(config.validate().is_err());

        // 1 day TTL with a 12 h threshold is fine
        config.tiers.age_threshold_hours = 12;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_should_monitor_volume() {
        let mut config = Config::default();
        assert!(config.should_monitor_volume("C:"));

        config.volumes.include = vec!["C:".to_string()];
        assert!(config.should_monitor_volume("c:"));
        assert!(!config.should_monitor_volume("D:"));

        config.volumes.include.clear();
        config.volumes.exclude = vec!["D:".to_string()];
        assert!(config.should_monitor_volume("C:"));
        assert!(!config.should_monitor_volume("D:"));
    }

}
