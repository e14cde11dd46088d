//! # Geometry Module
//!
//! Affine transforms, rectangles and sizes shared by the planner and the
//! frame compositor.

pub mod rect;
pub mod transform;

pub use rect::{Point, Rect, Size};
pub use transform::AffineTransform;
