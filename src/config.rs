//! Configuration for gambit.
//!
//! Every tunable lives in one TOML file; each field has a default so a
//! partial file (or none at all) is valid.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub search: SearchConfig,

    /// Worker threads for parsing and annotation (defaults to the CPU count).
    #[serde(default)]
    pub num_threads: Option<usize>,
}

/// UCI engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the engine binary.
    #[serde(default = "default_engine_path")]
    pub path: PathBuf,

    /// Extra command-line arguments for the engine.
    #[serde(default)]
    pub args: Vec<String>,

    /// Search depth in plies for every evaluation.
    #[serde(default = "default_engine_depth")]
    pub depth: u32,

    /// `Threads` option per engine process.
    #[serde(default = "default_engine_threads")]
    pub threads: u32,

    /// `Hash` option per engine process, in MB.
    #[serde(default = "default_hash_mb")]
    pub hash_mb: u32,

    /// Seconds to wait for any line of engine output before giving up.
    #[serde(default = "default_engine_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_engine_path() -> PathBuf {
    PathBuf::from("Engines/Stockfish")
}

fn default_engine_depth() -> u32 {
    20
}

fn default_engine_threads() -> u32 {
    1
}

fn default_hash_mb() -> u32 {
    16
}

fn default_engine_timeout_secs() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: default_engine_path(),
            args: Vec::new(),
            depth: default_engine_depth(),
            threads: default_engine_threads(),
            hash_mb: default_hash_mb(),
            timeout_secs: default_engine_timeout_secs(),
        }
    }
}

/// Partitioned position store locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Partitions read by `annotate` and `repair-mates`.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Partitions written by `annotate`, and read by `search` and `stats`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// First `total_ply` partition to process.
    #[serde(default)]
    pub start_ply: u32,

    /// Last `total_ply` partition to process (inclusive).
    #[serde(default = "default_end_ply")]
    pub end_ply: u32,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("../Project Scotch/Games/Storage")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Games/Storage")
}

fn default_end_ply() -> u32 {
    350
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            start_ply: 0,
            end_ply: default_end_ply(),
        }
    }
}

/// Side whose outcome the search optimises for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    White,
    Black,
}

impl Preference {
    /// +1 for White, -1 for Black.
    pub fn sign(self) -> f64 {
        match self {
            Preference::White => 1.0,
            Preference::Black => -1.0,
        }
    }
}

/// Line search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_preference")]
    pub preference: Preference,

    /// Ridge penalty on the predicted centipawn value.
    #[serde(default = "default_lambda")]
    pub lambda: f64,

    /// Number of plies averaged by the loss function.
    #[serde(default = "default_loss_depth")]
    pub depth: usize,

    /// Number of steps in the returned line.
    #[serde(default = "default_line_length")]
    pub line_length: usize,

    /// Runner-up candidates kept per step.
    #[serde(default = "default_alternatives")]
    pub alternatives: usize,
}

fn default_preference() -> Preference {
    Preference::White
}

fn default_lambda() -> f64 {
    0.01
}

fn default_loss_depth() -> usize {
    10
}

fn default_line_length() -> usize {
    5
}

fn default_alternatives() -> usize {
    2
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            preference: default_preference(),
            lambda: default_lambda(),
            depth: default_loss_depth(),
            line_length: default_line_length(),
            alternatives: default_alternatives(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.depth == 0 {
            return Err(invalid("engine.depth", "must be at least 1"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(invalid("engine.timeout_secs", "must be at least 1"));
        }
        if self.storage.start_ply > self.storage.end_ply {
            return Err(invalid(
                "storage.start_ply",
                "must not exceed storage.end_ply",
            ));
        }
        if self.search.depth == 0 {
            return Err(invalid("search.depth", "must be at least 1"));
        }
        if self.search.line_length == 0 {
            return Err(invalid("search.line_length", "must be at least 1"));
        }
        if self.search.lambda.is_nan() || self.search.lambda < 0.0 {
            return Err(invalid("search.lambda", "must be non-negative"));
        }
        if self.num_threads == Some(0) {
            return Err(invalid("num_threads", "must be at least 1"));
        }
        Ok(())
    }

    /// Thread count to use for rayon pools.
    pub fn threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
