use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for agnostic mask generation.
///
/// Each variant carries the context of its domain (filesystem, image decoding,
/// model inference, checkpoint resolution) so callers never have to parse
/// error strings.
#[derive(Error, Debug)]
pub enum AgnosticMaskError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Checkpoint resolution failed for {repo}")]
    Resolution {
        repo: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("{failed} image(s) failed to produce a mask")]
    Batch { failed: usize },
}

pub type Result<T> = std::result::Result<T, AgnosticMaskError>;

impl AgnosticMaskError {
    /// Filesystem error for an operation on a known path.
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Filesystem error for a path that is required but absent.
    pub fn missing(path: impl Into<PathBuf>, what: &str) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: "existence check".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{what} does not exist"),
            ),
        }
    }

    /// Model error built from a plain message, for shape and layout problems
    /// that have no underlying error value.
    pub fn model_message(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            operation: operation.into(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                message.into(),
            )),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Call sites that know the path and operation build `FileSystem` directly;
/// this is the fallback for the ones that do not.
impl From<std::io::Error> for AgnosticMaskError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

impl From<image::ImageError> for AgnosticMaskError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ort::Error> for AgnosticMaskError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Shape errors come out of tensor plumbing around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for AgnosticMaskError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<hf_hub::api::sync::ApiError> for AgnosticMaskError {
    fn from(err: hf_hub::api::sync::ApiError) -> Self {
        Self::Resolution {
            repo: "unknown".to_string(),
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_missing_keeps_not_found_source() {
        let err = AgnosticMaskError::missing("/data/image", "input folder");
        assert!(err.to_string().contains("existence check"));
        let source = err.source().expect("source");
        assert!(source.to_string().contains("input folder does not exist"));
    }

    #[test]
    fn test_batch_summary_message() {
        let err = AgnosticMaskError::Batch { failed: 3 };
        assert_eq!(err.to_string(), "3 image(s) failed to produce a mask");
    }
}
