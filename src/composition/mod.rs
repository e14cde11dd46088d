//! # Composition Module
//!
//! Turns a crop request and an inspected source into an immutable
//! [`CompositionPlan`]: which tracks are carried, over what time range, and
//! the geometry every output frame is rendered with.

pub mod builder;
pub mod plan;
pub mod planner;

pub use builder::{Composition, CompositionBuilder, CompositionTrack, MediaType, TrackId, TrackSegment};
pub use plan::{CompositionPlan, CropJob};
pub use planner::{RenderGeometry, TransformPlanner};
