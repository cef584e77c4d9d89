//! Error types for compositing operations

use thiserror::Error;

/// Result type alias for compositing operations
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Error taxonomy of the edit flow
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Input/output errors (export write failures, missing files, permissions)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors raised by the image crate while decoding or encoding
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// A source, background or export image could not be decoded or encoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The segmentation collaborator failed or timed out
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Mask buffer does not describe a valid grid
    #[error("Invalid mask: {0}")]
    InvalidMask(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation attempted on a session that was already closed
    #[error("Edit session {0} is closed")]
    SessionClosed(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ComposeError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new invalid mask error
    pub fn invalid_mask<S: Into<String>>(msg: S) -> Self {
        Self::InvalidMask(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create image loading error with format context
    pub fn image_load_error<P: AsRef<std::path::Path>>(path: P, error: &image::ImageError) -> Self {
        let path_display = path.as_ref().display();
        let extension = path
            .as_ref()
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");

        Self::Decode(format!(
            "Failed to load image '{}' (format: {}): {}. Supported formats: PNG, JPEG, WebP, TIFF",
            path_display, extension, error
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether the edit flow recovers from this error locally
    ///
    /// Segmentation failures degrade to the original photo; everything else
    /// terminates the current operation and is reported to the caller.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Segmentation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = ComposeError::invalid_config("test config error");
        assert!(matches!(err, ComposeError::InvalidConfig(_)));

        let err = ComposeError::segmentation("model unavailable");
        assert!(matches!(err, ComposeError::Segmentation(_)));
        assert!(err.is_recoverable());

        let err = ComposeError::decode("truncated png");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ComposeError::invalid_mask("buffer length 3 does not match 2x2");
        assert_eq!(
            err.to_string(),
            "Invalid mask: buffer length 3 does not match 2x2"
        );

        let err = ComposeError::SessionClosed("abc".to_string());
        assert_eq!(err.to_string(), "Edit session abc is closed");
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = ComposeError::file_io_error("write composed image", Path::new("/out/a.png"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("write composed image"));
        assert!(error_string.contains("/out/a.png"));
        assert!(matches!(err, ComposeError::Io(ref e) if e.kind() == std::io::ErrorKind::PermissionDenied));

        let err = ComposeError::config_value_error("opacity", 1.5, "0.0-1.0", Some(1.0));
        let error_string = err.to_string();
        assert!(error_string.contains("opacity"));
        assert!(error_string.contains("1.5"));
        assert!(error_string.contains("Recommended: 1"));
    }
}
