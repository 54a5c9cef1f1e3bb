//! Common types shared between `camera` and `infercam`.
pub mod types;

pub use types::{BoundingBox, Detection, Frame, Prediction, Results, TickResults};
