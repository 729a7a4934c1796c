//! Error types for popstats

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    /// An update's After hook found no staged pre-image for the record.
    #[error("No staged {kind} for id {id}; update dropped")]
    StagingMiss { kind: &'static str, id: String },

    /// A record arrived at Before without an identifier to stage it under.
    #[error("Cannot stage {kind} without an id")]
    Unstageable { kind: &'static str },

    /// A ledger call named a key that has no counter row. Upstream resolution
    /// should have rejected it, so this is a contract violation.
    #[error("Unknown key {key} in {table}")]
    UnknownKey { table: &'static str, key: String },

    #[error("Invalid reference data: {0}")]
    InvalidReference(String),

    /// The primary record write failed; interceptors get `on_error`.
    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StatsError {
    /// True for failures of the backing store (pool, statement, IO)
    pub fn is_store_failure(&self) -> bool {
        matches!(self, StatsError::Database(_) | StatsError::Pool(_) | StatsError::Io(_))
    }
}
