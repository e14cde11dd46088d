use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CropError, Result};
use crate::geometry::{AffineTransform, Rect, Size};
use crate::video::types::{SourceAsset, SourceTrack, TimeRange, TrackKind};

const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Reads the track layout of a source file
#[async_trait::async_trait]
pub trait AssetInspector: Send + Sync {
    /// Inspect the file at `path` and describe every track it contains
    async fn inspect(&self, path: &Path) -> Result<SourceAsset>;
}

/// Asset inspector backed by the `ffprobe` executable
pub struct FfprobeInspector {
    ffprobe: PathBuf,
}

impl FfprobeInspector {
    pub fn new<P: Into<PathBuf>>(ffprobe: P) -> Self {
        Self { ffprobe: ffprobe.into() }
    }

    fn inspection_error(path: &Path, reason: impl Into<String>) -> CropError {
        CropError::AssetInspection {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

impl Default for FfprobeInspector {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait::async_trait]
impl AssetInspector for FfprobeInspector {
    async fn inspect(&self, path: &Path) -> Result<SourceAsset> {
        debug!("Probing {:?} with {:?}", path, self.ffprobe);

        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Self::inspection_error(path, format!("failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::inspection_error(
                path,
                format!("ffprobe exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let asset = parse_probe_output(path, &output.stdout)?;
        info!(
            "Inspected {:?}: {:.2}s, {} video / {} audio tracks",
            path,
            asset.duration,
            asset.video_tracks().count(),
            asset.audio_tracks().count()
        );
        Ok(asset)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    start_time: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    side_data_type: Option<String>,
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Clockwise display rotation in degrees.
    ///
    /// The display matrix reports a counter-clockwise angle, the legacy
    /// `rotate` tag a clockwise one.
    fn clockwise_rotation(&self) -> f64 {
        self.side_data_list
            .iter()
            .find(|data| data.side_data_type.as_deref() == Some("Display Matrix"))
            .and_then(|data| data.rotation)
            .map(|rotation| -rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse::<f64>().ok()))
            .unwrap_or(0.0)
    }

    fn frame_rate(&self) -> f64 {
        [self.r_frame_rate.as_deref(), self.avg_frame_rate.as_deref()]
            .into_iter()
            .flatten()
            .find_map(parse_frame_rate)
            .unwrap_or(DEFAULT_FRAME_RATE)
    }
}

/// Turn `ffprobe -print_format json` output into a [`SourceAsset`]
pub fn parse_probe_output(path: &Path, json: &[u8]) -> Result<SourceAsset> {
    let probe: ProbeOutput = serde_json::from_slice(json).map_err(|e| CropError::AssetInspection {
        path: path.to_path_buf(),
        reason: format!("invalid ffprobe output: {}", e),
    })?;

    let format_duration = probe
        .format
        .as_ref()
        .and_then(|format| parse_seconds(format.duration.as_deref()));

    let stream_duration = probe
        .streams
        .iter()
        .filter_map(|stream| parse_seconds(stream.duration.as_deref()))
        .fold(None, |longest: Option<f64>, d| Some(longest.map_or(d, |l| l.max(d))));

    let duration = format_duration.or(stream_duration).ok_or_else(|| CropError::AssetInspection {
        path: path.to_path_buf(),
        reason: "source duration is unknown".to_string(),
    })?;

    let mut tracks = Vec::with_capacity(probe.streams.len());
    for stream in &probe.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => {
                let (Some(width), Some(height)) = (stream.width, stream.height) else {
                    warn!("Skipping video stream {} without dimensions", stream.index);
                    continue;
                };
                let natural_size = Size::from_pixels(width, height);
                TrackKind::Video {
                    natural_size,
                    frame_rate: stream.frame_rate(),
                    orientation: orientation_for_rotation(stream.clockwise_rotation(), natural_size),
                }
            }
            Some("audio") => TrackKind::Audio {
                sample_rate: stream
                    .sample_rate
                    .as_deref()
                    .and_then(|rate| rate.parse().ok())
                    .unwrap_or(0),
                channels: stream.channels.unwrap_or(0),
            },
            // Subtitles, data and attachment streams are not part of a crop
            _ => continue,
        };

        let start = parse_seconds(stream.start_time.as_deref()).unwrap_or(0.0).max(0.0);
        let track_duration = parse_seconds(stream.duration.as_deref()).unwrap_or(duration);

        tracks.push(SourceTrack {
            index: stream.index,
            codec: stream.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
            kind,
            time_range: TimeRange::new(start, track_duration),
        });
    }

    Ok(SourceAsset {
        path: path.to_path_buf(),
        duration,
        tracks,
    })
}

/// Stored orientation transform for a clockwise display rotation.
///
/// The result maps raw pixel coordinates (top-left origin, y down) onto the
/// upright frame, anchored so the upright frame starts at the origin.
pub fn orientation_for_rotation(clockwise_degrees: f64, natural_size: Size) -> AffineTransform {
    let degrees = clockwise_degrees.rem_euclid(360.0);
    if degrees == 0.0 {
        return AffineTransform::IDENTITY;
    }

    let (transform, _) = AffineTransform::rotation(degrees.to_radians())
        .anchored_at_origin(&Rect::from_size(natural_size));
    transform
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse `30000/1001` or `25` style frame rates
fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTRAIT_PROBE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "start_time": "0.000000",
                "duration": "5.005000",
                "side_data_list": [
                    { "side_data_type": "Display Matrix", "displaymatrix": "...", "rotation": -90 }
                ]
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "44100",
                "channels": 2,
                "duration": "5.000000"
            },
            {
                "index": 2,
                "codec_name": "bin_data",
                "codec_type": "data"
            }
        ],
        "format": { "duration": "5.005000" }
    }"#;

    #[test]
    fn test_parse_portrait_clip() {
        let asset = parse_probe_output(Path::new("portrait.mov"), PORTRAIT_PROBE.as_bytes()).unwrap();

        assert_eq!(asset.tracks.len(), 2);
        assert!((asset.duration - 5.005).abs() < 1e-9);

        let video = asset.video_tracks().next().unwrap();
        match &video.kind {
            TrackKind::Video { natural_size, frame_rate, orientation } => {
                assert_eq!(*natural_size, Size::new(1920.0, 1080.0));
                assert!((frame_rate - 29.97).abs() < 0.01);
                assert_eq!(*orientation, AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0));
            }
            other => panic!("unexpected track kind: {:?}", other),
        }

        let audio = asset.audio_tracks().next().unwrap();
        assert_eq!(audio.kind, TrackKind::Audio { sample_rate: 44_100, channels: 2 });
    }

    #[test]
    fn test_legacy_rotate_tag() {
        let json = r#"{
            "streams": [
                { "index": 0, "codec_type": "video", "width": 640, "height": 480,
                  "r_frame_rate": "0/0", "avg_frame_rate": "25/1", "tags": { "rotate": "180" } }
            ],
            "format": { "duration": "1.0" }
        }"#;

        let asset = parse_probe_output(Path::new("flip.mp4"), json.as_bytes()).unwrap();
        let TrackKind::Video { frame_rate, orientation, .. } = &asset.tracks[0].kind else {
            panic!("expected a video track");
        };
        assert_eq!(*frame_rate, 25.0);
        assert_eq!(*orientation, AffineTransform::new(-1.0, 0.0, 0.0, -1.0, 640.0, 480.0));
        assert_eq!(asset.tracks[0].time_range, TimeRange::new(0.0, 1.0));
    }

    #[test]
    fn test_missing_duration_is_an_error() {
        let json = r#"{ "streams": [ { "index": 0, "codec_type": "video", "width": 2, "height": 2 } ] }"#;
        let result = parse_probe_output(Path::new("broken.mov"), json.as_bytes());
        assert!(matches!(result, Err(CropError::AssetInspection { .. })));
    }

    #[test]
    fn test_garbage_output_is_an_error() {
        let result = parse_probe_output(Path::new("x.mov"), b"not json");
        assert!(matches!(result, Err(CropError::AssetInspection { .. })));
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_orientation_for_quarter_turns() {
        let size = Size::new(1920.0, 1080.0);
        assert!(orientation_for_rotation(0.0, size).is_identity());
        assert!(orientation_for_rotation(360.0, size).is_identity());
        assert_eq!(
            orientation_for_rotation(270.0, size),
            AffineTransform::new(0.0, -1.0, 1.0, 0.0, 0.0, 1920.0)
        );
        assert_eq!(orientation_for_rotation(-90.0, size), orientation_for_rotation(270.0, size));
    }
}
