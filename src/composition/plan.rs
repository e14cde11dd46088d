use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::composition::builder::{Composition, CompositionBuilder, TrackId};
use crate::composition::planner::{RenderGeometry, TransformPlanner};
use crate::error::{CropError, Result};
use crate::geometry::{AffineTransform, Rect, Size};
use crate::video::{SourceAsset, TimeRange, TrackKind};

/// A single crop request: one source, one static rectangle, one angle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropJob {
    /// Source media file
    pub source: PathBuf,

    /// Crop in the displayed frame (top-left origin, y down, pixels)
    pub rect: Rect,

    /// Clockwise rotation in radians applied before cropping
    pub angle: f64,
}

impl CropJob {
    pub fn new<P: Into<PathBuf>>(source: P, rect: Rect, angle: f64) -> Self {
        Self { source: source.into(), rect, angle }
    }

    /// Checks that need neither the filesystem nor the media
    pub fn validate_rect(&self) -> Result<()> {
        if !self.rect.is_finite() || !(self.rect.width > 0.0 && self.rect.height > 0.0) {
            return Err(CropError::invalid_rect(format!(
                "width and height must be positive, got {}x{}",
                self.rect.width, self.rect.height
            )));
        }
        Ok(())
    }
}

/// Everything an export needs to render one crop.
///
/// Derived deterministically from a [`CropJob`] and the inspected source.
/// Owned by the running export and never modified after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionPlan {
    /// Source media file
    pub source: PathBuf,

    /// Composition video tracks, in source order
    pub video_track_ids: Vec<TrackId>,

    /// Composition audio tracks, in source order
    pub audio_track_ids: Vec<TrackId>,

    /// Source stream index behind the first video track
    pub video_source_index: usize,

    /// Source stream indices behind the audio tracks
    pub audio_source_indices: Vec<usize>,

    /// Full output timeline
    pub time_range: TimeRange,

    /// Stored source-to-display transform of the rendered track
    pub orientation: AffineTransform,

    /// Nominal frame rate of the rendered track
    pub frame_rate: f64,

    /// Planned geometry for every frame
    pub geometry: RenderGeometry,
}

impl CompositionPlan {
    /// Build the composition and plan the geometry for `job` against `asset`
    pub fn build(job: &CropJob, asset: &SourceAsset, planner: &TransformPlanner) -> Result<Self> {
        let composition = CompositionBuilder::build(asset)?;
        Self::from_composition(job, asset, &composition, planner)
    }

    fn from_composition(
        job: &CropJob,
        asset: &SourceAsset,
        composition: &Composition,
        planner: &TransformPlanner,
    ) -> Result<Self> {
        let primary = composition
            .video_tracks()
            .first()
            .ok_or(CropError::VideoTrackNotFound)?;
        let video_source_index = primary
            .primary_source_index()
            .ok_or_else(|| CropError::composition(format!("video track {} is empty", primary.id)))?;

        let source_track = asset
            .track(video_source_index)
            .ok_or_else(|| CropError::composition(format!("source stream {} vanished", video_source_index)))?;

        let TrackKind::Video { natural_size, frame_rate, orientation } = source_track.kind else {
            return Err(CropError::composition(format!(
                "source stream {} is not a video stream",
                video_source_index
            )));
        };

        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(CropError::composition(format!("invalid frame rate {}", frame_rate)));
        }

        let geometry = planner.plan(natural_size, orientation, job.rect, job.angle)?;

        Ok(Self {
            source: job.source.clone(),
            video_track_ids: composition.video_track_ids(),
            audio_track_ids: composition.audio_track_ids(),
            video_source_index,
            audio_source_indices: composition
                .audio_tracks()
                .iter()
                .filter_map(|track| track.primary_source_index())
                .collect(),
            time_range: composition.time_range(),
            orientation,
            frame_rate,
            geometry,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The composition track that gets rendered
    pub fn primary_video_track(&self) -> TrackId {
        self.video_track_ids[0]
    }

    /// Crop rectangle in the rotated frame, pixel aligned
    pub fn crop_rect(&self) -> Rect {
        self.geometry.crop_rect
    }

    /// Output frame dimensions
    pub fn render_size(&self) -> (u32, u32) {
        self.geometry.render_size
    }

    /// Raw source frame dimensions
    pub fn source_size(&self) -> (u32, u32) {
        self.geometry.source_size.to_pixels()
    }

    pub fn duration(&self) -> f64 {
        self.time_range.duration
    }

    /// Number of frames the export will render
    pub fn total_frames(&self) -> u64 {
        ((self.time_range.duration * self.frame_rate).round() as u64).max(1)
    }

    /// Extent of the frame the crop rectangle refers to
    pub fn frame_extent(&self) -> Size {
        self.geometry.rotated_extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::SourceTrack;
    use std::f64::consts::FRAC_PI_2;

    fn hd_asset(with_audio: bool) -> SourceAsset {
        let mut tracks = vec![SourceTrack {
            index: 0,
            codec: "h264".to_string(),
            kind: TrackKind::Video {
                natural_size: Size::new(1920.0, 1080.0),
                frame_rate: 30.0,
                orientation: AffineTransform::IDENTITY,
            },
            time_range: TimeRange::from_duration(5.0),
        }];
        if with_audio {
            tracks.push(SourceTrack {
                index: 1,
                codec: "aac".to_string(),
                kind: TrackKind::Audio { sample_rate: 48_000, channels: 2 },
                time_range: TimeRange::from_duration(5.0),
            });
        }
        SourceAsset { path: PathBuf::from("hd.mov"), duration: 5.0, tracks }
    }

    #[test]
    fn test_centre_crop_plan() {
        let job = CropJob::new("hd.mov", Rect::new(480.0, 270.0, 960.0, 540.0), 0.0);
        let plan = CompositionPlan::build(&job, &hd_asset(true), &TransformPlanner::default()).unwrap();

        assert_eq!(plan.render_size(), (960, 540));
        assert_eq!(plan.crop_rect().size(), Size::new(960.0, 540.0));
        assert_eq!(plan.duration(), 5.0);
        assert_eq!(plan.total_frames(), 150);
        assert_eq!(plan.primary_video_track(), TrackId(1));
        assert_eq!(plan.audio_track_ids, vec![TrackId(2)]);
        assert_eq!(plan.audio_source_indices, vec![1]);
        assert_eq!(plan.video_source_index, 0);
    }

    #[test]
    fn test_rotated_plan_uses_post_rotation_extent() {
        let job = CropJob::new("hd.mov", Rect::new(480.0, 270.0, 960.0, 540.0), FRAC_PI_2);
        let plan = CompositionPlan::build(&job, &hd_asset(false), &TransformPlanner::default()).unwrap();

        assert_eq!(plan.frame_extent(), Size::new(1080.0, 1920.0));
        assert_eq!(plan.crop_rect(), Rect::new(480.0, 270.0, 600.0, 540.0));
        assert_eq!(plan.render_size(), (600, 540));
        assert!(plan.audio_track_ids.is_empty());
    }

    #[test]
    fn test_render_size_matches_crop_size() {
        let job = CropJob::new("hd.mov", Rect::new(100.0, 100.0, 5000.0, 5000.0), 0.0);
        let plan = CompositionPlan::build(&job, &hd_asset(true), &TransformPlanner::default()).unwrap();

        let (w, h) = plan.render_size();
        assert_eq!(Size::from_pixels(w, h), plan.crop_rect().size());
        assert_eq!(plan.render_size(), (1820, 980));
    }

    #[test]
    fn test_validate_rect() {
        assert!(CropJob::new("a", Rect::new(0.0, 0.0, 0.0, 0.0), 0.0).validate_rect().is_err());
        assert!(CropJob::new("a", Rect::new(0.0, 0.0, 10.0, -1.0), 0.0).validate_rect().is_err());
        assert!(CropJob::new("a", Rect::new(0.0, 0.0, f64::NAN, 1.0), 0.0).validate_rect().is_err());
        assert!(CropJob::new("a", Rect::new(-5.0, -5.0, 10.0, 10.0), 0.0).validate_rect().is_ok());
    }
}
