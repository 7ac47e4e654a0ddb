//! Error Handling Module
//!
//! Defines the error type shared by the data pipeline, the model and the
//! training loop. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for capsule-network experiments
#[derive(Error, Debug)]
pub enum CapsNetError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decoding or processing an image
    #[error("Image error: {0}")]
    Image(String),

    /// Error with dataset discovery or loading
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Oversampling strategy could not be applied
    #[error("Oversampling error: {0}")]
    Oversample(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error building, saving or loading the model
    #[error("Model error: {0}")]
    Model(String),

    /// Error during training or evaluation
    #[error("Training error: {0}")]
    Training(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for CapsNetError {
    fn from(err: serde_json::Error) -> Self {
        CapsNetError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for CapsNetError {
    fn from(err: image::ImageError) -> Self {
        CapsNetError::Image(err.to_string())
    }
}

/// Convenience Result type for capsule-network operations
pub type Result<T> = std::result::Result<T, CapsNetError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| CapsNetError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| CapsNetError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| CapsNetError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| CapsNetError::InvalidInput(f()))
    }
}
