use std::path::PathBuf;

use thiserror::Error;

/// Main error type for crop requests.
///
/// Every call to [`ExportCoordinator::crop`](crate::export::ExportCoordinator::crop)
/// resolves to either an output path or exactly one of these.
#[derive(Error, Debug)]
pub enum CropError {
    #[error("Source file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("Invalid crop rectangle: {reason}")]
    InvalidCropRect { reason: String },

    #[error("Source asset has no video track")]
    VideoTrackNotFound,

    #[error("Failed to create composition: {reason}")]
    CompositionCreationFailed { reason: String },

    #[error("Export failed: {0}")]
    ExportFailed(#[source] ExportError),

    #[error("Crop was cancelled")]
    Cancelled,

    #[error("Failed to inspect source asset {}: {reason}", path.display())]
    AssetInspection { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by an export backend while a job is running
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export backend unavailable: {backend}")]
    Unavailable { backend: String },

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    Process {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Frame processing failed: {reason}")]
    FrameProcessing { reason: String },

    #[error("Export task failed: {reason}")]
    Join { reason: String },

    #[error("Export was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using CropError
pub type Result<T> = std::result::Result<T, CropError>;

impl From<ExportError> for CropError {
    fn from(error: ExportError) -> Self {
        match error {
            ExportError::Cancelled => Self::Cancelled,
            other => Self::ExportFailed(other),
        }
    }
}

impl CropError {
    pub fn invalid_rect<S: Into<String>>(reason: S) -> Self {
        Self::InvalidCropRect { reason: reason.into() }
    }

    pub fn composition<S: Into<String>>(reason: S) -> Self {
        Self::CompositionCreationFailed { reason: reason.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::ExportFailed(ExportError::Io(_)) => true,
            Self::ExportFailed(ExportError::Process { .. }) => true,
            // A cancelled job can simply be started again
            Self::Cancelled => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { path } => {
                format!("Could not find video file '{}'. Please check the file exists.", path.display())
            }
            Self::InvalidCropRect { .. } => {
                "The crop area does not cover any part of the video. Please adjust the crop box.".to_string()
            }
            Self::VideoTrackNotFound => {
                "The selected file does not contain a video track.".to_string()
            }
            Self::ExportFailed(ExportError::Unavailable { backend }) => {
                format!("Video export requires {}. Please install it and try again.", backend)
            }
            Self::Cancelled => "The crop was cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_export_maps_to_cancelled_crop() {
        let error: CropError = ExportError::Cancelled.into();
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_export_failure_preserves_source() {
        use std::error::Error as _;

        let error: CropError = ExportError::FrameProcessing {
            reason: "missing source frame".to_string(),
        }
        .into();

        assert!(matches!(error, CropError::ExportFailed(_)));
        let source = error.source().map(|s| s.to_string()).unwrap_or_default();
        assert!(source.contains("missing source frame"));
    }

    #[test]
    fn test_user_message_names_missing_file() {
        let error = CropError::FileNotFound { path: PathBuf::from("clip.mov") };
        assert!(error.user_message().contains("clip.mov"));
        assert!(!error.is_recoverable());
    }
}
