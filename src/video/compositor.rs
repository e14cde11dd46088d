//! Per-frame rendering of a planned crop.
//!
//! Each destination pixel centre is mapped back through the inverse of the
//! planned transform into the source raster and sampled there. Orientation
//! normalization, user rotation and the crop offset were folded into that
//! one transform by the planner, so a frame costs a single pass.

use rayon::prelude::*;
use tracing::debug;

use crate::composition::{CompositionPlan, TrackId};
use crate::config::{Interpolation, RenderConfig};
use crate::error::ExportError;
use crate::geometry::{AffineTransform, Point};
use crate::video::types::Frame;

/// Fractions this close to a pixel centre are treated as exact
const SAMPLE_EPSILON: f64 = 1e-9;

/// Rendering resources shared by every frame of one export
pub struct RenderContext {
    pool: rayon::ThreadPool,
    interpolation: Interpolation,
}

impl RenderContext {
    pub fn new(config: &RenderConfig) -> Result<Self, ExportError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.render_threads)
            .thread_name(|i| format!("crop-render-{}", i))
            .build()
            .map_err(|e| ExportError::FrameProcessing {
                reason: format!("failed to build render pool: {}", e),
            })?;

        Ok(Self { pool, interpolation: config.interpolation })
    }
}

/// Source frames available for one output instant, keyed by composition track
#[derive(Default)]
pub struct SourceFrames<'a> {
    frames: Vec<(TrackId, &'a Frame)>,
}

impl<'a> SourceFrames<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames for a single track
    pub fn single(track: TrackId, frame: &'a Frame) -> Self {
        Self { frames: vec![(track, frame)] }
    }

    pub fn get(&self, track: TrackId) -> Option<&'a Frame> {
        self.frames.iter().find(|(id, _)| *id == track).map(|(_, frame)| *frame)
    }
}

/// Renders the cropped, rotated output frame for every source frame
pub struct FrameCompositor {
    context: RenderContext,
    track: TrackId,
    source_size: (u32, u32),
    render_size: (u32, u32),
    inverse: AffineTransform,
}

impl FrameCompositor {
    pub fn new(plan: &CompositionPlan, context: RenderContext) -> Result<Self, ExportError> {
        let track = *plan.video_track_ids.first().ok_or_else(|| ExportError::FrameProcessing {
            reason: "plan has no video track to render".to_string(),
        })?;

        let inverse = plan.geometry.transform.inverted().ok_or_else(|| ExportError::FrameProcessing {
            reason: "planned transform is not invertible".to_string(),
        })?;

        let render_size = plan.render_size();
        if render_size.0 == 0 || render_size.1 == 0 {
            return Err(ExportError::FrameProcessing {
                reason: format!("render size {}x{} is empty", render_size.0, render_size.1),
            });
        }

        debug!(
            "Compositor ready: track {} {}x{} -> {}x{}",
            track,
            plan.source_size().0,
            plan.source_size().1,
            render_size.0,
            render_size.1
        );

        Ok(Self {
            context,
            track,
            source_size: plan.source_size(),
            render_size,
            inverse,
        })
    }

    pub fn render_size(&self) -> (u32, u32) {
        self.render_size
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// Allocate a destination frame of the planned render size
    pub fn new_destination(&self) -> Frame {
        Frame::new_black(self.render_size.0, self.render_size.1)
    }

    /// Render one output frame into `destination`.
    ///
    /// Only the first video track of the plan is rendered. A missing source
    /// frame or a size mismatch fails the whole export.
    pub fn render(&self, sources: &SourceFrames<'_>, destination: &mut Frame) -> Result<(), ExportError> {
        let source = sources.get(self.track).ok_or_else(|| ExportError::FrameProcessing {
            reason: format!("missing source frame for track {}", self.track),
        })?;

        if source.dimensions() != self.source_size {
            return Err(ExportError::FrameProcessing {
                reason: format!(
                    "source frame is {}x{}, expected {}x{}",
                    source.width(),
                    source.height(),
                    self.source_size.0,
                    self.source_size.1
                ),
            });
        }

        if destination.dimensions() != self.render_size {
            return Err(ExportError::FrameProcessing {
                reason: format!(
                    "destination frame is {}x{}, expected {}x{}",
                    destination.width(),
                    destination.height(),
                    self.render_size.0,
                    self.render_size.1
                ),
            });
        }

        let (width, height) = self.render_size;
        let row_len = width as usize * 3;
        let inverse = self.inverse;
        let interpolation = self.context.interpolation;

        self.context.pool.install(|| {
            destination
                .as_rgb_bytes_mut()
                .par_chunks_mut(row_len)
                .enumerate()
                .for_each(|(row, pixels)| {
                    // Render space runs bottom-up, rows run top-down
                    let y = height as f64 - row as f64 - 0.5;
                    for col in 0..width as usize {
                        let point = inverse.apply(Point::new(col as f64 + 0.5, y));
                        let rgb = sample(source, point, interpolation);
                        pixels[col * 3..col * 3 + 3].copy_from_slice(&rgb);
                    }
                });
        });

        Ok(())
    }
}

/// Sample the source at a render-space point, black outside the frame
fn sample(source: &Frame, point: Point, interpolation: Interpolation) -> [u8; 3] {
    let (width, height) = source.dimensions();
    let sx = point.x - 0.5;
    let sy = height as f64 - point.y - 0.5;

    if !(sx >= -0.5 && sx <= width as f64 - 0.5 && sy >= -0.5 && sy <= height as f64 - 0.5) {
        return [0, 0, 0];
    }

    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;

    match interpolation {
        Interpolation::Nearest => {
            let x = sx.round().clamp(0.0, max_x) as u32;
            let y = sy.round().clamp(0.0, max_y) as u32;
            source.get_pixel(x, y)
        }
        Interpolation::Bilinear => {
            let (x0, fx) = split(sx.clamp(0.0, max_x));
            let (y0, fy) = split(sy.clamp(0.0, max_y));

            if fx == 0.0 && fy == 0.0 {
                return source.get_pixel(x0, y0);
            }

            let x1 = (x0 + 1).min(width - 1);
            let y1 = (y0 + 1).min(height - 1);

            let p00 = source.get_pixel(x0, y0);
            let p10 = source.get_pixel(x1, y0);
            let p01 = source.get_pixel(x0, y1);
            let p11 = source.get_pixel(x1, y1);

            let mut out = [0u8; 3];
            for c in 0..3 {
                let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
                let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
                out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
            }
            out
        }
    }
}

/// Integer pixel and fractional offset, snapping near-exact centres
fn split(value: f64) -> (u32, f64) {
    let floor = value.floor();
    let fraction = value - floor;
    if fraction < SAMPLE_EPSILON {
        (floor as u32, 0.0)
    } else if fraction > 1.0 - SAMPLE_EPSILON {
        (floor as u32 + 1, 0.0)
    } else {
        (floor as u32, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{CropJob, TransformPlanner};
    use crate::geometry::{Rect, Size};
    use crate::video::{SourceAsset, SourceTrack, TimeRange, TrackKind};
    use std::f64::consts::{FRAC_PI_2, PI};
    use std::path::PathBuf;

    /// A frame whose pixel at (x, y) encodes its own coordinates
    fn coordinate_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::new_black(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, [x as u8, y as u8, 255]);
            }
        }
        frame
    }

    fn plan_for(
        width: u32,
        height: u32,
        orientation: AffineTransform,
        rect: Rect,
        angle: f64,
    ) -> CompositionPlan {
        let asset = SourceAsset {
            path: PathBuf::from("test.mov"),
            duration: 1.0,
            tracks: vec![SourceTrack {
                index: 0,
                codec: "rawvideo".to_string(),
                kind: TrackKind::Video {
                    natural_size: Size::from_pixels(width, height),
                    frame_rate: 10.0,
                    orientation,
                },
                time_range: TimeRange::from_duration(1.0),
            }],
        };
        let job = CropJob::new("test.mov", rect, angle);
        CompositionPlan::build(&job, &asset, &TransformPlanner::new(false)).unwrap()
    }

    fn compositor(plan: &CompositionPlan, interpolation: Interpolation) -> FrameCompositor {
        let config = RenderConfig { interpolation, render_threads: 2 };
        FrameCompositor::new(plan, RenderContext::new(&config).unwrap()).unwrap()
    }

    fn render(plan: &CompositionPlan, source: &Frame) -> Frame {
        let compositor = compositor(plan, Interpolation::Bilinear);
        let mut destination = compositor.new_destination();
        compositor
            .render(&SourceFrames::single(plan.primary_video_track(), source), &mut destination)
            .unwrap();
        destination
    }

    #[test]
    fn test_plain_crop_copies_region() {
        let source = coordinate_frame(8, 6);
        let plan = plan_for(8, 6, AffineTransform::IDENTITY, Rect::new(2.0, 1.0, 4.0, 3.0), 0.0);
        let output = render(&plan, &source);

        assert_eq!(output.dimensions(), (4, 3));
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(output.get_pixel(x, y), [x as u8 + 2, y as u8 + 1, 255]);
            }
        }
    }

    #[test]
    fn test_quarter_turn_rotates_clockwise() {
        let source = coordinate_frame(4, 2);
        let plan = plan_for(4, 2, AffineTransform::IDENTITY, Rect::new(0.0, 0.0, 2.0, 4.0), FRAC_PI_2);
        let output = render(&plan, &source);

        // Clockwise: the left column of the source becomes the top row
        assert_eq!(output.dimensions(), (2, 4));
        assert_eq!(output.get_pixel(0, 0), [0, 1, 255]);
        assert_eq!(output.get_pixel(1, 0), [0, 0, 255]);
        assert_eq!(output.get_pixel(0, 3), [3, 1, 255]);
        assert_eq!(output.get_pixel(1, 3), [3, 0, 255]);
    }

    #[test]
    fn test_half_turn_reverses_both_axes() {
        let source = coordinate_frame(3, 2);
        let plan = plan_for(3, 2, AffineTransform::IDENTITY, Rect::new(0.0, 0.0, 3.0, 2.0), PI);
        let output = render(&plan, &source);

        assert_eq!(output.get_pixel(0, 0), [2, 1, 255]);
        assert_eq!(output.get_pixel(2, 1), [0, 0, 255]);
    }

    #[test]
    fn test_portrait_orientation_is_presented_upright() {
        // Raw 4x2 landscape pixels meant to be shown rotated 90 degrees clockwise
        let orientation = AffineTransform::new(0.0, 1.0, -1.0, 0.0, 2.0, 0.0);
        let source = coordinate_frame(4, 2);
        let plan = plan_for(4, 2, orientation, Rect::new(0.0, 0.0, 2.0, 4.0), 0.0);
        let output = render(&plan, &source);

        assert_eq!(output.dimensions(), (2, 4));
        // Raw top-left ends up at the upright top-right
        assert_eq!(output.get_pixel(1, 0), [0, 0, 255]);
        assert_eq!(output.get_pixel(0, 0), [0, 1, 255]);
        assert_eq!(output.get_pixel(1, 3), [3, 0, 255]);
    }

    #[test]
    fn test_rotation_then_crop_selects_post_rotation_region() {
        let source = coordinate_frame(4, 2);
        // Bottom half of the rotated 2x4 frame
        let plan = plan_for(4, 2, AffineTransform::IDENTITY, Rect::new(0.0, 2.0, 2.0, 2.0), FRAC_PI_2);
        let output = render(&plan, &source);

        assert_eq!(output.dimensions(), (2, 2));
        assert_eq!(output.get_pixel(0, 0), [2, 1, 255]);
        assert_eq!(output.get_pixel(1, 1), [3, 0, 255]);
    }

    #[test]
    fn test_nearest_matches_bilinear_on_exact_grid() {
        let source = coordinate_frame(6, 4);
        let plan = plan_for(6, 4, AffineTransform::IDENTITY, Rect::new(1.0, 1.0, 4.0, 2.0), FRAC_PI_2 * 3.0);

        let bilinear = render(&plan, &source);
        let nearest = compositor(&plan, Interpolation::Nearest);
        let mut destination = nearest.new_destination();
        nearest
            .render(&SourceFrames::single(plan.primary_video_track(), &source), &mut destination)
            .unwrap();

        assert_eq!(bilinear, destination);
    }

    #[test]
    fn test_destination_is_reused_between_frames() {
        let plan = plan_for(4, 4, AffineTransform::IDENTITY, Rect::new(0.0, 0.0, 2.0, 2.0), 0.0);
        let compositor = compositor(&plan, Interpolation::Bilinear);
        let mut destination = compositor.new_destination();

        let red = Frame::new_filled(4, 4, [255, 0, 0]);
        let blue = Frame::new_filled(4, 4, [0, 0, 255]);
        let track = plan.primary_video_track();

        compositor.render(&SourceFrames::single(track, &red), &mut destination).unwrap();
        assert_eq!(destination.get_pixel(1, 1), [255, 0, 0]);
        compositor.render(&SourceFrames::single(track, &blue), &mut destination).unwrap();
        assert_eq!(destination.get_pixel(1, 1), [0, 0, 255]);
    }

    #[test]
    fn test_missing_source_frame_is_fatal() {
        let plan = plan_for(4, 4, AffineTransform::IDENTITY, Rect::new(0.0, 0.0, 2.0, 2.0), 0.0);
        let compositor = compositor(&plan, Interpolation::Bilinear);
        let mut destination = compositor.new_destination();

        let result = compositor.render(&SourceFrames::new(), &mut destination);
        assert!(matches!(result, Err(ExportError::FrameProcessing { .. })));

        let wrong_size = Frame::new_black(3, 3);
        let result = compositor.render(
            &SourceFrames::single(plan.primary_video_track(), &wrong_size),
            &mut destination,
        );
        assert!(matches!(result, Err(ExportError::FrameProcessing { .. })));
    }

    #[test]
    fn test_arbitrary_angle_leaves_corners_black() {
        let source = Frame::new_filled(20, 20, [200, 200, 200]);
        let plan = plan_for(20, 20, AffineTransform::IDENTITY, Rect::new(0.0, 0.0, 100.0, 100.0), PI / 4.0);
        let output = render(&plan, &source);

        let (w, h) = output.dimensions();
        assert_eq!(output.get_pixel(0, 0), [0, 0, 0]);
        assert_eq!(output.get_pixel(w / 2, h / 2), [200, 200, 200]);
    }
}
