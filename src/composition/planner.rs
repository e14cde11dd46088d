//! Output geometry for a crop.
//!
//! Planning happens in the render space used by the compositor: origin at the
//! bottom-left, y growing upward. Stored orientation transforms and crop
//! rectangles arrive in the top-left, y-down space of the crop box and are
//! mapped across here, once, so the per-frame work is a single transform.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CropError, Result};
use crate::geometry::{AffineTransform, Rect, Size};

/// Angles closer than this to a full turn count as no rotation
const ANGLE_EPSILON: f64 = 1e-9;

/// Resolved geometry for every frame of one crop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderGeometry {
    /// Raw pixel size of the source frames
    pub source_size: Size,

    /// Upright-presentation transform in render space, when the track is reoriented
    pub normalize: Option<AffineTransform>,

    /// Frame size after normalization
    pub normalized_extent: Size,

    /// User rotation in render space, when the angle is non-zero
    pub rotation: Option<AffineTransform>,

    /// Frame size after the user rotation
    pub rotated_extent: Size,

    /// Pixel-aligned crop in crop-box space (top-left origin)
    pub crop_rect: Rect,

    /// The same crop in render space (bottom-left origin)
    pub flipped_crop_rect: Rect,

    /// Source render space to output render space
    pub transform: AffineTransform,

    /// Output frame dimensions, equal to the crop size
    pub render_size: (u32, u32),
}

/// Computes [`RenderGeometry`] without touching any media
#[derive(Debug, Clone, Copy)]
pub struct TransformPlanner {
    even_dimensions: bool,
}

impl Default for TransformPlanner {
    fn default() -> Self {
        Self { even_dimensions: true }
    }
}

impl TransformPlanner {
    /// `even_dimensions` shrinks the aligned crop to even width and height
    pub fn new(even_dimensions: bool) -> Self {
        Self { even_dimensions }
    }

    /// Plan the geometry of a crop.
    ///
    /// * `natural_size` - raw pixel size of the source track
    /// * `orientation` - stored orientation transform (top-left origin)
    /// * `crop_rect` - crop in the rotated, upright frame (top-left origin)
    /// * `angle` - clockwise user rotation in radians
    pub fn plan(
        &self,
        natural_size: Size,
        orientation: AffineTransform,
        crop_rect: Rect,
        angle: f64,
    ) -> Result<RenderGeometry> {
        if natural_size.is_empty() {
            return Err(CropError::composition(format!(
                "source track has no pixels ({}x{})",
                natural_size.width, natural_size.height
            )));
        }
        if !angle.is_finite() {
            return Err(CropError::invalid_rect(format!("rotation angle {} is not finite", angle)));
        }

        let source_bounds = Rect::from_size(natural_size);

        // Step 1: present the raw frame upright
        let (normalize, normalized_extent) = if orientation.is_reoriented() {
            let (transform, extent) = AffineTransform::flip_vertical(natural_size.height)
                .concatenating(&orientation)
                .concatenating(&AffineTransform::scale(1.0, -1.0))
                .anchored_at_origin(&source_bounds);
            (Some(transform), extent)
        } else {
            (None, natural_size)
        };

        // Step 2: the user rotation. Render space runs y upward, so the
        // clockwise crop-box angle becomes a rotation by 2π - angle.
        let angle = angle.rem_euclid(TAU);
        let (rotation, rotated_extent) = if angle > ANGLE_EPSILON && TAU - angle > ANGLE_EPSILON {
            let (transform, extent) = AffineTransform::rotation(TAU - angle)
                .anchored_at_origin(&Rect::from_size(normalized_extent));
            (Some(transform), extent)
        } else {
            (None, normalized_extent)
        };

        // Step 3: clamp and align the crop inside the rotated frame
        let crop_rect = self.align_crop(crop_rect, rotated_extent)?;

        // Step 4: move the crop into render space and fold everything together
        let flipped_crop_rect = Rect::new(
            crop_rect.x,
            rotated_extent.height - crop_rect.y - crop_rect.height,
            crop_rect.width,
            crop_rect.height,
        );

        let transform = normalize
            .unwrap_or(AffineTransform::IDENTITY)
            .concatenating(&rotation.unwrap_or(AffineTransform::IDENTITY))
            .translated(-flipped_crop_rect.x, -flipped_crop_rect.y);

        if transform.inverted().is_none() {
            return Err(CropError::composition("orientation transform is not invertible"));
        }

        let render_size = crop_rect.size().to_pixels();
        debug!(
            "Planned crop {} in {}x{} frame -> {}x{} output",
            crop_rect, rotated_extent.width, rotated_extent.height, render_size.0, render_size.1
        );

        Ok(RenderGeometry {
            source_size: natural_size,
            normalize,
            normalized_extent,
            rotation,
            rotated_extent,
            crop_rect,
            flipped_crop_rect,
            transform,
            render_size,
        })
    }

    /// Intersect with the frame and snap to whole pixels inside it
    fn align_crop(&self, crop_rect: Rect, extent: Size) -> Result<Rect> {
        if crop_rect.is_empty() {
            return Err(CropError::invalid_rect(format!(
                "crop rectangle {} has no area",
                crop_rect
            )));
        }

        let frame = Rect::from_size(extent);
        let clamped = frame.intersection(&crop_rect).ok_or_else(|| {
            CropError::invalid_rect(format!(
                "crop rectangle {} lies outside the {}x{} frame",
                crop_rect, extent.width, extent.height
            ))
        })?;

        let max_x = extent.width.floor();
        let max_y = extent.height.floor();
        let min_x = clamped.min_x().round().clamp(0.0, max_x);
        let min_y = clamped.min_y().round().clamp(0.0, max_y);
        let mut width = clamped.max_x().round().clamp(0.0, max_x) - min_x;
        let mut height = clamped.max_y().round().clamp(0.0, max_y) - min_y;

        if self.even_dimensions {
            width -= width % 2.0;
            height -= height % 2.0;
        }

        if width < 1.0 || height < 1.0 {
            return Err(CropError::invalid_rect(format!(
                "crop rectangle {} collapses to {}x{} pixels",
                crop_rect, width, height
            )));
        }

        Ok(Rect::new(min_x, min_y, width, height))
    }
}
