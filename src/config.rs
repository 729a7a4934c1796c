//! Configuration for popstats

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StatsError;

/// SNOMED CT code system URI
pub const SNOMED_CODE_SYSTEM: &str = "http://snomed.info/sct";

/// Default storage directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("popstats")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding reference data and counters
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Code system used when seeding disease mappings that omit one
    #[serde(default = "default_code_system")]
    pub code_system: String,

    /// Subdivision key reserved for "undefined" localities
    #[serde(default = "default_undefined_key")]
    pub undefined_subdivision_key: String,

    /// Reference data (regions, subdivisions, diseases) to seed on init
    #[serde(default)]
    pub reference_data: Option<PathBuf>,

    /// Capacity of the stats event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("stats.db")
}

fn default_pool_size() -> u32 {
    4
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_code_system() -> String {
    SNOMED_CODE_SYSTEM.to_string()
}

fn default_undefined_key() -> String {
    "00000".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            code_system: default_code_system(),
            undefined_subdivision_key: default_undefined_key(),
            reference_data: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StatsError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StatsError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StatsError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Config file next to the database
    pub fn config_path(&self) -> PathBuf {
        self.data_dir().join("config.toml")
    }

    /// Directory holding the database file
    pub fn data_dir(&self) -> PathBuf {
        self.database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = toml::from_str("pool_size = 8").unwrap();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.code_system, SNOMED_CODE_SYSTEM);
        assert_eq!(config.undefined_subdivision_key, "00000");
        assert!(config.reference_data.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config {
            database_path: dir.path().join("stats.db"),
            reference_data: Some(dir.path().join("reference.toml")),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.database_path, config.database_path);
        assert_eq!(loaded.reference_data, config.reference_data);
        assert_eq!(loaded.data_dir(), dir.path());
    }
}
