use std::path::PathBuf;

use thiserror::Error;

/// Contract violations raised by the encoder and the classifier head.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("keep probability must be in (0, 1], got {0}")]
    InvalidKeepProb(f64),
}

/// Failures while reading or encoding a dataset.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: polars::error::PolarsError,
    },

    #[error("dataset {path} has {actual} columns, expected {expected}")]
    ColumnCount {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("row {row}: symbol {value} is outside the one-hot depth {depth}")]
    SymbolOutOfRange { row: usize, value: f32, depth: usize },

    #[error("row {row}: label {value} is outside 0..{num_classes}")]
    LabelOutOfRange {
        row: usize,
        value: f32,
        num_classes: usize,
    },

    #[error("row {row} contains a missing value")]
    MissingValue { row: usize },

    #[error("dataset is empty")]
    Empty,
}

/// Fatal errors of a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to record model parameters: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    #[error("failed to serialize {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode result file: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode result file: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("inconsistent result array: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl TrainError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type TrainResult<T> = std::result::Result<T, TrainError>;
