//! Error types for gambit.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the library.
#[derive(Debug, Error)]
pub enum GambitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("PGN error: {0}")]
    Pgn(String),

    #[error("No game found in PGN")]
    NoGame,

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Column `{column}` missing from {path:?}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("Column `{column}` has unsupported type in {path:?}")]
    ColumnType { column: String, path: PathBuf },

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Not enough centipawn evaluations to find a learning moment")]
    NoLearningMoment,

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl GambitError {
    /// Wrap an io::Error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GambitError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GambitError>;
