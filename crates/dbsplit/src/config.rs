//! Configuration for dbsplit.
//!
//! Shard definitions and partitions are normally described once in a TOML
//! file and turned into a [`DbSplit`](crate::DbSplit) at startup:
//! - Default values (no shards, no partitions, `info` logging)
//! - Configuration files (TOML format)
//! - Environment variable overrides (prefix: `DBSPLIT__`)
//!
//! # Environment Variables
//!
//! - `DBSPLIT__LOGGING__LEVEL=debug`
//! - `DBSPLIT__LOGGING__JSON=true`
//!
//! # Example
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [[shards]]
//! table = "filecache"
//! primary_key = "fileid"
//! shard_key = "storage"
//! companion_keys = ["parent"]
//! companion_tables = ["filecache_extended"]
//! mapper = "round_robin"
//! shards = ["shard0", "shard1"]
//!
//! [[partitions]]
//! name = "shares"
//! tables = ["share", "share_external"]
//! connection = "shares_db"
//! ```

use dbsplit_partition::{PartitionSplit, FROM_PREFIX};
use dbsplit_sharding::{MapperKind, ShardDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbSplitConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Sharded tables
    pub shards: Vec<ShardDefinitionConfig>,
    /// Vertically partitioned table groups
    pub partitions: Vec<PartitionConfig>,
}

impl Default for DbSplitConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            shards: Vec::new(),
            partitions: Vec::new(),
        }
    }
}

impl DbSplitConfig {
    /// Loads configuration from an optional file path with environment variable overrides.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (DBSPLIT__*)
    /// 2. Configuration file (if provided)
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(file_path) = path {
            if Path::new(file_path).exists() {
                let contents = std::fs::read_to_string(file_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DBSPLIT__LOGGING__LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("DBSPLIT__LOGGING__JSON") {
            self.logging.json = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Checks the shard and partition layout for conflicts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut claimed = HashSet::new();
        for shard in &self.shards {
            if shard.table.is_empty() || shard.primary_key.is_empty() || shard.shard_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "shard definitions need a table, a primary key and a shard key".to_string(),
                ));
            }
            if shard.shards.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "shard definition for {} has no shards",
                    shard.table
                )));
            }
            for table in std::iter::once(&shard.table).chain(&shard.companion_tables) {
                if !claimed.insert(table.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "table {} is part of more than one shard definition",
                        table
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        for partition in &self.partitions {
            if partition.name.starts_with(FROM_PREFIX) {
                return Err(ConfigError::Invalid(format!(
                    "partition name {} uses the reserved prefix {}",
                    partition.name, FROM_PREFIX
                )));
            }
            if !names.insert(partition.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "partition {} is defined more than once",
                    partition.name
                )));
            }
            if partition.tables.is_empty() {
                return Err(ConfigError::Invalid(format!("partition {} has no tables", partition.name)));
            }
        }
        Ok(())
    }

    /// Serializes the configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `DBSPLIT_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// One sharded table and its companions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardDefinitionConfig {
    pub table: String,
    pub primary_key: String,
    pub shard_key: String,
    pub companion_keys: Vec<String>,
    pub companion_tables: Vec<String>,
    /// Key to shard mapping strategy
    pub mapper: MapperKind,
    /// Connection names, shard `i` is served by `shards[i]`
    pub shards: Vec<String>,
}

impl ShardDefinitionConfig {
    pub fn build(&self) -> ShardDefinition {
        ShardDefinition::new(&self.table, &self.primary_key, &self.shard_key, self.mapper.build())
            .with_companion_keys(self.companion_keys.iter().cloned())
            .with_companion_tables(self.companion_tables.iter().cloned())
            .with_shards(self.shards.iter().cloned())
    }
}

/// A group of tables stored on their own database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub name: String,
    pub tables: Vec<String>,
    /// Named connection serving the partition; the default connection if unset
    pub connection: Option<String>,
}

impl PartitionConfig {
    pub fn to_split(&self) -> PartitionSplit {
        PartitionSplit::new(&self.name, self.tables.iter().cloned())
    }
}
