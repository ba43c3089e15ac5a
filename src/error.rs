//! Error types for the image store and dataset pipeline.

use std::path::Path;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while importing, converting or building data
#[derive(Debug, Error)]
pub enum Error {
    /// Store or dataset log operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image could not be decoded or encoded
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Manifest or bundle (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    /// A file referenced by a log is missing on disk
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("unknown conversion: {0}")]
    UnknownConversion(String),

    #[error("unknown transform: {0}")]
    UnknownTransform(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("dataset not found: dataset-{0}")]
    DatasetNotFound(u32),

    /// Feature rows could not be stacked into one array
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Invalid caller input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed or unsupported .npy file
    #[error("array format error: {0}")]
    ArrayFormat(String),

    /// Worker pool could not be created
    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Creates a data-unavailable error for a missing file.
    pub fn data_unavailable(path: &Path) -> Self {
        Self::DataUnavailable(path.display().to_string())
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn array_format(reason: impl Into<String>) -> Self {
        Self::ArrayFormat(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::WorkerPool(err.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ArrayFormat(err.to_string())
    }
}
