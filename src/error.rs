//! Error Handling Module
//!
//! Defines custom error types for the leafscan library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for leafscan operations
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset assembly error (missing root, empty classes, bad split)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// A single sample failed to decode or transform
    #[error("Failed to load sample '{path}': {reason}")]
    SampleLoad { path: PathBuf, reason: String },

    /// Accelerator configuration failed (recoverable: fall back to CPU)
    #[error("Accelerator configuration error: {0}")]
    AcceleratorConfig(String),

    /// Checkpoint persistence failed (fatal for the run)
    #[error("Checkpoint I/O error: {0}")]
    CheckpointIo(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// Image processing error outside the per-sample load path
    #[error("Image error: {0}")]
    Image(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl Error {
    /// Build a `SampleLoad` error for a given path
    pub fn sample_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SampleLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type for leafscan operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Dataset("no classes found".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no classes found");
    }

    #[test]
    fn test_sample_load_error() {
        let err = Error::sample_load("/data/leaf.jpg", "truncated file");
        assert!(format!("{}", err).contains("leaf.jpg"));
        assert!(format!("{}", err).contains("truncated file"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
