use std::path::PathBuf;

use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::geometry::{AffineTransform, Size};

/// Represents a single decoded video frame
///
/// A thin wrapper around an RGB image buffer. Rows are stored top to bottom,
/// so pixel `(0, 0)` is the top-left corner of the raw frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    buffer: RgbImage,
}

impl Frame {
    /// Create a new frame from an RGB image buffer
    pub fn new(buffer: RgbImage) -> Self {
        Self { buffer }
    }

    /// Create a new frame with the given dimensions filled with black
    pub fn new_black(width: u32, height: u32) -> Self {
        Self { buffer: ImageBuffer::new(width, height) }
    }

    /// Create a new frame with the given dimensions filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        let buffer = ImageBuffer::from_pixel(width, height, Rgb(color));
        Self { buffer }
    }

    /// Get the width of the frame
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    /// Get the height of the frame
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.buffer.dimensions()
    }

    /// Get a pixel at the given coordinates (returns RGB array)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.buffer.get_pixel(x, y).0
    }

    /// Set a pixel at the given coordinates
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        self.buffer.put_pixel(x, y, Rgb(color));
    }

    /// Raw RGB bytes, row-major
    pub fn as_rgb_bytes(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    /// Mutable raw RGB bytes, row-major
    pub fn as_rgb_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Create a frame from raw RGB bytes, `None` when the length does not match
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|buffer| Self { buffer })
    }

    /// Give the backing storage back so it can be reused for the next frame
    pub fn into_rgb_bytes(self) -> Vec<u8> {
        self.buffer.into_raw()
    }

    /// Size in bytes of one RGB frame with the given dimensions
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }
}

/// A span on the media timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub duration: f64,
}

impl TimeRange {
    pub const fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    /// Range starting at zero
    pub const fn from_duration(duration: f64) -> Self {
        Self::new(0.0, duration)
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Finite, non-negative start and strictly positive duration
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.duration.is_finite() && self.start >= 0.0 && self.duration > 0.0
    }
}

/// Media-specific properties of a source track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackKind {
    Video {
        /// Raw pixel dimensions as stored in the stream
        natural_size: Size,
        /// Nominal frames per second
        frame_rate: f64,
        /// Transform that presents the raw frame upright (top-left origin, y down)
        orientation: AffineTransform,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
    },
}

/// One stream inside a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTrack {
    /// Stream index within the container
    pub index: usize,

    /// Codec name reported by the container
    pub codec: String,

    pub kind: TrackKind,

    /// Span of the source timeline covered by this track
    pub time_range: TimeRange,
}

impl SourceTrack {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, TrackKind::Audio { .. })
    }
}

/// An inspected source file with all of its tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub path: PathBuf,

    /// Total duration in seconds
    pub duration: f64,

    pub tracks: Vec<SourceTrack>,
}

impl SourceAsset {
    pub fn video_tracks(&self) -> impl Iterator<Item = &SourceTrack> {
        self.tracks.iter().filter(|track| track.is_video())
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &SourceTrack> {
        self.tracks.iter().filter(|track| track.is_audio())
    }

    pub fn track(&self, index: usize) -> Option<&SourceTrack> {
        self.tracks.iter().find(|track| track.index == index)
    }
}
