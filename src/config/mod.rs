//! Configuration management.
//!
//! Configuration is read from `~/.config/estuary/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is
//! created. Missing fields fall back to their defaults.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use serde::Deserialize;

use crate::fetcher::http_fetcher::TransportConfig;
use crate::fetcher::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerSection,
    pub transport: TransportSection,
    pub enrichment: EnrichmentSection,
    pub retention: RetentionSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSection::default(),
            transport: TransportSection::default(),
            enrichment: EnrichmentSection::default(),
            retention: RetentionSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Seconds between scheduler ticks.
    pub tick_secs: u64,
    /// Maximum feeds refreshed per tick.
    pub batch_size: usize,
    /// Pause between feeds within a tick, to avoid bursting origins.
    pub inter_feed_delay_ms: u64,
    /// Delay before the first refresh after process start.
    pub warm_start_delay_secs: u64,
    /// Seconds between maintenance runs (retention + optimize).
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_secs: 300,
            batch_size: 10,
            inter_feed_delay_ms: 1000,
            warm_start_delay_secs: 10,
            maintenance_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub feed_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            retries: transport.retry.retries,
            base_delay_ms: transport.retry.base_delay_ms,
            max_delay_ms: transport.retry.max_delay_ms,
            feed_timeout_secs: transport.feed_timeout_secs,
            page_timeout_secs: transport.page_timeout_secs,
            pool_max_idle_per_host: transport.pool_max_idle_per_host,
            pool_idle_timeout_secs: transport.pool_idle_timeout_secs,
        }
    }
}

impl TransportSection {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            retry: RetryPolicy {
                retries: self.retries,
                base_delay_ms: self.base_delay_ms,
                max_delay_ms: self.max_delay_ms,
            },
            feed_timeout_secs: self.feed_timeout_secs,
            page_timeout_secs: self.page_timeout_secs,
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout_secs: self.pool_idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSection {
    /// Whether the background enricher (full text, icons, thumbnails) runs.
    pub enabled: bool,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    /// Retention runs deleting at least this many rows trigger compaction.
    pub compact_after_deletes: u64,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            compact_after_deletes: 500,
        }
    }
}

impl Config {
    /// Load configuration from the default path, creating a commented
    /// default file on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        Ok(config)
    }

    /// `~/.config/estuary/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("estuary").join("config.toml"))
    }

    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# Estuary configuration

[scheduler]
# Seconds between scheduler ticks
tick_secs = 300

# Maximum feeds refreshed per tick
batch_size = 10

# Pause between feeds within a tick (milliseconds)
inter_feed_delay_ms = 1000

# Delay before the first refresh after process start (seconds)
warm_start_delay_secs = 10

# Seconds between maintenance runs (retention + optimize)
maintenance_interval_secs = 86400

[transport]
# Retries for transient failures (timeouts, resets, 5xx/429)
retries = 2

# Backoff: min(max_delay, base_delay * 2^attempt) with +-20% jitter
base_delay_ms = 300
max_delay_ms = 2000

# Feed fetches get the longer timeout; enrichment page fetches the shorter
feed_timeout_secs = 10
page_timeout_secs = 5

# Keep-alive connection pool, per origin
pool_max_idle_per_host = 4
pool_idle_timeout_secs = 90

[enrichment]
# Background full-text extraction and icon/thumbnail caching
enabled = true

[retention]
# Retention runs deleting at least this many rows trigger compaction
compact_after_deletes = 500
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.scheduler.tick_secs, 300);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.transport.retries, 2);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let content = r#"
[scheduler]
tick_secs = 60
"#;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.scheduler.tick_secs, 60);
        // Untouched fields keep defaults
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.transport.max_delay_ms, 2000);
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.scheduler.inter_feed_delay_ms, 1000);
        assert!(config.enrichment.enabled);
    }
}
