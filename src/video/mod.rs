//! # Video Module
//!
//! Source inspection, frame buffers and per-frame rendering.

pub mod compositor;
pub mod probe;
pub mod types;

pub use compositor::{FrameCompositor, RenderContext, SourceFrames};
pub use probe::{AssetInspector, FfprobeInspector};
pub use types::{Frame, SourceAsset, SourceTrack, TimeRange, TrackKind};
