use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a dataset build.
///
/// Per-annotation misses (unknown class codes, unmatched PSEZ boxes) and
/// missing source images are not errors; they are counted in
/// [`ProcessingStats`](crate::types::ProcessingStats).
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse annotation export {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Malformed annotation record {id}: {reason}")]
    MalformedRecord { id: i64, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DatasetError>;
