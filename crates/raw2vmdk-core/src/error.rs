//! Error types for the raw2vmdk core library.

use std::path::PathBuf;

/// The main error type for raw2vmdk operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error with optional path context.
    #[error("I/O error{}: {source}", path.as_ref().map(|p| format!(" at '{}'", p.display())).unwrap_or_default())]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    /// Invalid or unusable input image.
    #[error("input error: {message}")]
    Input { message: String },

    /// VMDK encoding error (geometry or layout invariant violated).
    #[error("VMDK error: {message}")]
    Vmdk { message: String },

    /// Grain compression codec failure. Fatal for the whole run.
    #[error("compression error: {message}")]
    Compress { message: String },

    /// Error in the parallel encoding pipeline.
    #[error("pipeline error: {message}")]
    Pipeline { message: String },
}

/// A specialized Result type for raw2vmdk operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an I/O error with path context.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create an I/O error without path context.
    pub fn io_simple(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }

    /// Create an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Create a VMDK encoding error.
    pub fn vmdk(message: impl Into<String>) -> Self {
        Self::Vmdk {
            message: message.into(),
        }
    }

    /// Create a compression error.
    pub fn compress(message: impl Into<String>) -> Self {
        Self::Compress {
            message: message.into(),
        }
    }

    /// Create a pipeline error.
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::io_simple(source)
    }
}
