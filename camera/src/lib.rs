//! Frame sources feeding the inference loop.
pub mod sensors;
pub mod still;

use common::Frame;

pub use sensors::{CameraConfig, Facing, V4lCamera};
pub use still::StillImageSource;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Source of frames for the inference loop.
pub trait CaptureSource: Send {
    /// Whether the source has produced at least one decodable frame.
    fn is_ready(&self) -> bool;

    /// Capture the next frame.
    ///
    /// Returns `Ok(None)` while the source has no decodable frame yet, in which case the
    /// current tick should be skipped.
    fn capture(&mut self) -> Result<Option<Frame>, Error>;

    /// Facing mode of the source, front-facing sources are previewed mirrored.
    fn facing(&self) -> Facing {
        Facing::Environment
    }
}
