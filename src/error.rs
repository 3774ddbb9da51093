//! Error types and handling for dropmaker

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for dropmaker operations
pub type Result<T> = std::result::Result<T, DropmakerError>;

/// Main error type for dropmaker operations
#[derive(Debug, Error)]
pub enum DropmakerError {
    /// Rejected configuration (capacity, quality, config file contents)
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// API misuse, e.g. submitting to an executor that already started
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// Unparsable resize argument
    #[error("Invalid resize specification '{spec}': {message}")]
    InvalidResize { spec: String, message: String },

    /// I/O related errors without a more specific context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input image could not be read or decoded
    #[error("Failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Transformed image could not be encoded
    #[error("Failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Encoded bytes could not be written
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Watermark image could not be loaded
    #[error("Failed to load watermark {path:?}: {source}")]
    Watermark {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Requested output exceeds the size limit
    #[error("Image too large: {width}x{height} pixels (limit: {limit} pixels)")]
    ImageTooLarge { width: u32, height: u32, limit: u64 },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(String),
}

impl DropmakerError {
    /// Create a new invalid configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a new illegal state error
    pub fn illegal_state<S: Into<String>>(message: S) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a new image too large error
    pub fn image_too_large(width: u32, height: u32, limit: u64) -> Self {
        Self::ImageTooLarge {
            width,
            height,
            limit,
        }
    }

    /// Create a new invalid resize error
    pub fn invalid_resize<S: Into<String>, M: Into<String>>(spec: S, message: M) -> Self {
        Self::InvalidResize {
            spec: spec.into(),
            message: message.into(),
        }
    }

    /// Check if this error only affects a single file (the batch can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Decode { .. }
            | Self::Encode { .. }
            | Self::Write { .. }
            | Self::ImageTooLarge { .. } => true,

            Self::InvalidConfiguration { .. }
            | Self::IllegalState { .. }
            | Self::InvalidResize { .. }
            | Self::Watermark { .. }
            | Self::Serde(_) => false,
        }
    }

    /// Get the associated file path if available
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Decode { path, .. }
            | Self::Encode { path, .. }
            | Self::Write { path, .. }
            | Self::Watermark { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Io(e) => format!("File system error: {}", e),
            Self::Decode { path, source } => {
                format!("Could not read image {}: {}", path.display(), source)
            }
            Self::Watermark { path, .. } => {
                format!("Watermark {} is not a readable image", path.display())
            }
            Self::InvalidResize { spec, message } => format!(
                "Resize '{}' not understood ({}). Use N%, WxH, N or mode:WxH \
                 with mode one of contain, contain_down, crop, stretch, cover, min",
                spec, message
            ),
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for DropmakerError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serde(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for DropmakerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serde(format!("YAML parsing error: {}", err))
    }
}

/// Error context extension for attaching the file an image operation touched
pub trait ErrorContext<T> {
    /// Map an image decoding failure to [`DropmakerError::Decode`]
    fn decoding(self, path: impl Into<PathBuf>) -> Result<T>;
    /// Map an image encoding failure to [`DropmakerError::Encode`]
    fn encoding(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> ErrorContext<T> for std::result::Result<T, image::ImageError> {
    fn decoding(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| DropmakerError::Decode {
            path: path.into(),
            source,
        })
    }

    fn encoding(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| DropmakerError::Encode {
            path: path.into(),
            source,
        })
    }
}

/// Same as [`ErrorContext`] for plain I/O results
pub trait IoContext<T> {
    /// Map an I/O failure to [`DropmakerError::Write`]
    fn writing(self, path: impl Into<PathBuf>) -> Result<T>;
    /// Map an I/O failure while opening an input to [`DropmakerError::Decode`]
    fn reading(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn writing(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| DropmakerError::Write {
            path: path.into(),
            source,
        })
    }

    fn reading(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| DropmakerError::Decode {
            path: path.into(),
            source: image::ImageError::IoError(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = DropmakerError::invalid_configuration("capacity must be at least 1");
        assert!(matches!(err, DropmakerError::InvalidConfiguration { .. }));

        let err = DropmakerError::illegal_state("already running");
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_recoverable_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Result<()> = Err(io).writing("out.jpg");
        assert!(err.unwrap_err().is_recoverable());

        assert!(!DropmakerError::invalid_configuration("x").is_recoverable());
        assert!(!DropmakerError::illegal_state("x").is_recoverable());
    }

    #[test]
    fn test_user_messages() {
        let err = DropmakerError::invalid_resize("foo:10", "unknown mode 'foo'");
        let msg = err.user_message();
        assert!(msg.contains("foo:10"));
        assert!(msg.contains("contain_down"));
    }

    #[test]
    fn test_file_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let result: Result<()> = Err(io).reading(Path::new("in.png"));
        let err = result.unwrap_err();

        assert!(matches!(err, DropmakerError::Decode { .. }));
        assert_eq!(err.file_path().unwrap(), Path::new("in.png"));
    }
}
