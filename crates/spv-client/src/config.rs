//! SPV client configuration.
//!
//! [`SpvConfig`] has usable defaults for every field. [`SpvConfig::load`]
//! layers an optional TOML file and then `SPV_*` environment variables
//! (e.g. `SPV_MIN_PEERS_FOR_SYNC=5`) on top of them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use spv_core::bloom::DEFAULT_FALSE_POSITIVE_RATE;
use spv_core::cache::DEFAULT_CACHE_CAPACITY;

use crate::error::ConfigError;

/// Minimum connected peers before header sync starts.
pub const DEFAULT_MIN_PEERS_FOR_SYNC: usize = 3;

pub const DEFAULT_MAX_PEERS: usize = 125;

/// False positives tolerated in one merkle block before the filter is
/// rebuilt with a fresh tweak.
pub const DEFAULT_MAX_FALSE_POSITIVES: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpvConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Base58 foundation address the genesis header is derived from. Empty
    /// selects the network default.
    pub foundation: String,
    pub header_cache_capacity: usize,
    pub min_peers_for_sync: usize,
    pub max_peers: usize,
    /// Target false-positive rate of the bloom filter.
    pub filter_fp_rate: f64,
    pub max_false_positives: u32,
    /// Log level filter string (e.g. "info", "spv_client=debug").
    pub log_level: String,
    /// "text" or "json".
    pub log_format: String,
}

impl Default for SpvConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spv");

        Self {
            data_dir,
            foundation: String::new(),
            header_cache_capacity: DEFAULT_CACHE_CAPACITY,
            min_peers_for_sync: DEFAULT_MIN_PEERS_FOR_SYNC,
            max_peers: DEFAULT_MAX_PEERS,
            filter_fp_rate: DEFAULT_FALSE_POSITIVE_RATE,
            max_false_positives: DEFAULT_MAX_FALSE_POSITIVES,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl SpvConfig {
    /// Load from an optional TOML file, then `SPV_*` environment variables.
    /// Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }
        let cfg = builder
            .add_source(::config::Environment::with_prefix("SPV"))
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Path to the RocksDB header database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("headers")
    }
}
