use thiserror::Error;

/// Crate-wide error type for the ladder-builder pipeline.
#[derive(Error, Debug)]
pub enum LadderError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decompression failed for \"{key}\": {reason}")]
    DecompressionFailure { key: String, reason: String },

    #[error("File \"{0}\" is empty")]
    EmptyFile(String),

    /// A line in the stream was missing `pt`, missing/empty `mc`, or carried more
    /// than one market change. The whole file is rejected when this occurs.
    #[error("Malformed packet in \"{key}\" at line {line}: {reason}")]
    MalformedPacket {
        key: String,
        line: usize,
        reason: String,
    },

    #[error("Duplicate metadata insert for market {market_id}")]
    DuplicateMetadataInsert { market_id: String },

    #[error("Invalid market definition: {0}")]
    InvalidMarketDefinition(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LadderError>;
