//! Error type shared by every stage of the PDR pipeline.
//!
//! Configuration and input problems, degenerate bootstrap windows, invalid orchestrator state
//! transitions, and model persistence problems are all fatal and surface as a [`PdrError`].
//! A segment in which no step is detected is *not* an error; it is reported as an empty result.

use std::io;

/// Errors raised by the PDR pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PdrError {
    #[error("required sensor channel '{0}' is missing")]
    MissingChannel(&'static str),
    #[error("sensor channel '{0}' contains no samples")]
    EmptyChannel(&'static str),
    #[error("timestamps of channel '{channel}' decrease at sample {index}")]
    NonMonotonicTime { channel: &'static str, index: usize },
    #[error("ground truth is required but absent: {0}")]
    MissingGroundTruth(&'static str),
    #[error("slice [{start}, {end}) exceeds the {available} available samples")]
    SliceOutOfRange {
        start: usize,
        end: usize,
        available: usize,
    },
    #[error("channel '{channel}' has {len} samples, expected {expected}")]
    LengthMismatch {
        channel: &'static str,
        len: usize,
        expected: usize,
    },
    #[error("cannot bootstrap heading: {0}")]
    DegenerateBootstrap(String),
    #[error("degenerate {kind} vector at sample {index}")]
    DegenerateVector { kind: &'static str, index: usize },
    #[error("invalid state transition: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
    #[error("step model mismatch: expected {expected}, found {found}")]
    ModelMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("insufficient training data: {0}")]
    InsufficientTrainingData(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("model encoding error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("logger setup failed: {0}")]
    Logger(#[from] log::SetLoggerError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PdrError>;
