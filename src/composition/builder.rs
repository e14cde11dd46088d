use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CropError, Result};
use crate::video::{SourceAsset, SourceTrack, TimeRange};

/// Identifier of a track inside a [`Composition`].
///
/// Allocated sequentially starting at 1; independent of source stream indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
}

/// A span of one source track placed on the composition timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSegment {
    /// Stream index of the source track
    pub source_index: usize,

    /// Portion of the source track being used
    pub source_range: TimeRange,

    /// Where the segment starts on the composition timeline
    pub target_start: f64,
}

/// One video or audio track of a composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionTrack {
    pub id: TrackId,
    pub media_type: MediaType,
    pub segments: Vec<TrackSegment>,
}

impl CompositionTrack {
    fn new(id: TrackId, media_type: MediaType) -> Self {
        Self { id, media_type, segments: Vec::new() }
    }

    /// Place `range` of `source` on this track starting at `at` seconds
    pub fn insert_time_range(&mut self, range: TimeRange, source: &SourceTrack, at: f64) -> Result<()> {
        let source_type = if source.is_video() { MediaType::Video } else { MediaType::Audio };
        if source_type != self.media_type {
            return Err(CropError::composition(format!(
                "cannot insert {:?} stream {} into {:?} track {}",
                source_type, source.index, self.media_type, self.id
            )));
        }

        if !range.is_valid() {
            return Err(CropError::composition(format!(
                "invalid time range {:.3}s+{:.3}s for stream {}",
                range.start, range.duration, source.index
            )));
        }

        if !at.is_finite() || at < 0.0 {
            return Err(CropError::composition(format!("invalid insertion offset {}", at)));
        }

        if range.start >= source.time_range.end() {
            return Err(CropError::composition(format!(
                "range starting at {:.3}s lies beyond the end of stream {} ({:.3}s)",
                range.start,
                source.index,
                source.time_range.end()
            )));
        }

        self.segments.push(TrackSegment {
            source_index: source.index,
            source_range: range,
            target_start: at,
        });
        Ok(())
    }

    /// Stream index of the first inserted source track
    pub fn primary_source_index(&self) -> Option<usize> {
        self.segments.first().map(|segment| segment.source_index)
    }
}

/// Virtual timeline holding time-aligned video and audio tracks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Composition {
    video_tracks: Vec<CompositionTrack>,
    audio_tracks: Vec<CompositionTrack>,
    next_track_id: u32,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new empty track
    pub fn add_track(&mut self, media_type: MediaType) -> &mut CompositionTrack {
        self.next_track_id += 1;
        let track = CompositionTrack::new(TrackId(self.next_track_id), media_type);

        let tracks = match media_type {
            MediaType::Video => &mut self.video_tracks,
            MediaType::Audio => &mut self.audio_tracks,
        };
        tracks.push(track);
        let last = tracks.len() - 1;
        &mut tracks[last]
    }

    pub fn video_tracks(&self) -> &[CompositionTrack] {
        &self.video_tracks
    }

    pub fn audio_tracks(&self) -> &[CompositionTrack] {
        &self.audio_tracks
    }

    pub fn video_track_ids(&self) -> Vec<TrackId> {
        self.video_tracks.iter().map(|track| track.id).collect()
    }

    pub fn audio_track_ids(&self) -> Vec<TrackId> {
        self.audio_tracks.iter().map(|track| track.id).collect()
    }

    /// Span from zero to the end of the last segment on any track
    pub fn time_range(&self) -> TimeRange {
        let end = self
            .video_tracks
            .iter()
            .chain(&self.audio_tracks)
            .flat_map(|track| &track.segments)
            .map(|segment| segment.target_start + segment.source_range.duration)
            .fold(0.0, f64::max);
        TimeRange::from_duration(end)
    }
}

/// Assembles a composition that covers the full duration of a source asset
pub struct CompositionBuilder;

impl CompositionBuilder {
    /// Build a composition with one track per source video and audio track.
    ///
    /// Every track receives the asset's full time range at offset zero, so
    /// timing is unchanged.
    pub fn build(asset: &SourceAsset) -> Result<Composition> {
        let videos: Vec<&SourceTrack> = asset.video_tracks().collect();
        if videos.is_empty() {
            return Err(CropError::VideoTrackNotFound);
        }
        if videos.len() > 1 {
            warn!(
                "Source {:?} has {} video tracks; only the first one is rendered",
                asset.path,
                videos.len()
            );
        }

        let full_range = TimeRange::from_duration(asset.duration);
        let mut composition = Composition::new();

        for source in videos {
            let track = composition.add_track(MediaType::Video);
            track.insert_time_range(full_range, source, 0.0)?;
            debug!("Video stream {} -> composition track {}", source.index, track.id);
        }

        for source in asset.audio_tracks() {
            let track = composition.add_track(MediaType::Audio);
            track.insert_time_range(full_range, source, 0.0)?;
            debug!("Audio stream {} -> composition track {}", source.index, track.id);
        }

        Ok(composition)
    }
}
