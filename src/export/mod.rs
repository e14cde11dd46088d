//! # Export Module
//!
//! Runs crop jobs: the single-flight coordinator, the backend seam and the
//! ffmpeg implementation of it.

pub mod backend;
pub mod coordinator;
pub mod ffmpeg;

pub use backend::{ExportBackend, ExportContext, ExportJob, ExportProgress};
pub use coordinator::{ExportCoordinator, ExportState, ExportStatus};
pub use ffmpeg::FfmpegExportBackend;
