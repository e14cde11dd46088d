//! # Video Cropper
//!
//! Crop and rotate video files offline while keeping every audio track.
//!
//! A crop request names a source file, a rectangle in the displayed frame
//! and a clockwise rotation. The crate inspects the source, builds a
//! composition covering its full duration, plans the pixel geometry and
//! renders a new file at a generated temporary path, reporting progress on
//! the way. Only one export runs at a time; starting another cancels it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use video_cropper::{
//!     composition::CropJob,
//!     config::Config,
//!     export::ExportCoordinator,
//!     geometry::Rect,
//! };
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let coordinator = ExportCoordinator::with_ffmpeg(Config::default());
//!
//! let job = CropJob::new("clip.mov", Rect::new(480.0, 270.0, 960.0, 540.0), 0.0);
//! let output = coordinator
//!     .crop(job, |progress| println!("{:.0}%", progress * 100.0))
//!     .await?;
//!
//! println!("Cropped video written to {}", output.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`geometry`] - Points, rectangles and affine transforms
//! - [`video`] - Source inspection, frame buffers and per-frame rendering
//! - [`composition`] - Composition building and crop geometry planning
//! - [`export`] - Single-flight export coordination and the ffmpeg backend
//! - [`config`] - Configuration management
//!
//! ## Custom Backends
//!
//! Inspection and encoding sit behind the [`AssetInspector`](video::AssetInspector)
//! and [`ExportBackend`](export::ExportBackend) traits, so the coordinator
//! can drive something other than ffmpeg:
//!
//! ```rust,no_run
//! use video_cropper::error::ExportError;
//! use video_cropper::export::{ExportBackend, ExportContext, ExportJob};
//!
//! struct NullBackend;
//!
//! #[async_trait::async_trait]
//! impl ExportBackend for NullBackend {
//!     fn name(&self) -> &str {
//!         "null"
//!     }
//!
//!     async fn export(&self, job: ExportJob, context: ExportContext) -> Result<(), ExportError> {
//!         context.check_cancelled()?;
//!         tokio::fs::write(&job.output_path, b"").await?;
//!         Ok(())
//!     }
//! }
//! ```

pub mod composition;
pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{CompositionPlan, CropJob},
    config::Config,
    error::{CropError, Result},
    export::{ExportCoordinator, ExportState, ExportStatus},
    geometry::{AffineTransform, Rect},
};
