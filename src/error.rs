//! Custom error types for kvedit.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the kvedit library.
#[derive(Error, Debug)]
pub enum Error {
    /// An input file does not exist.
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },

    /// Failed to load or decode an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The mask image cannot be used to select latent positions.
    #[error("invalid mask {path}: {reason}")]
    InvalidMask { path: PathBuf, reason: String },

    /// A saved latent is missing, corrupt, or does not fit the current latent.
    #[error("failed to deserialize latent from {path}: {reason}")]
    Deserialization { path: PathBuf, reason: String },

    /// Failed to serialize a latent to disk.
    #[error("failed to write latent to {path}: {source}")]
    LatentWrite {
        path: PathBuf,
        #[source]
        source: safetensors::SafeTensorError,
    },

    /// A model file is not present locally and no download location is configured.
    #[error("model file {path} is missing and no model URL is configured")]
    ModelMissing { path: PathBuf },

    /// Failed to download a model.
    #[error("failed to download model {name}: {source}")]
    ModelDownload {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to load an ONNX model.
    #[error("failed to load ONNX model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: ort::Error,
    },

    /// Model inference failed.
    #[error("model inference failed: {source}")]
    Inference {
        #[source]
        source: ort::Error,
    },

    /// Tokenizer could not be loaded or failed to encode a prompt.
    #[error("tokenizer {name}: {reason}")]
    Tokenizer { name: String, reason: String },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`].
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for kvedit operations.
pub type Result<T> = std::result::Result<T, Error>;
