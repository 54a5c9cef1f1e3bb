//! Still image frame source.
//!
use std::path::Path;

use common::Frame;

use crate::{CaptureSource, Error, Facing};

/// Serves the same image on every capture, for running without a camera.
pub struct StillImageSource {
    frame: Frame,
    facing: Facing,
}

impl StillImageSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let image = image::open(path.as_ref())?.to_rgb8();
        log::info!(
            "Using still image {} ({}x{})",
            path.as_ref().display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_frame(Frame::new(image)))
    }

    pub fn from_frame(frame: Frame) -> Self {
        Self {
            frame,
            facing: Facing::Environment,
        }
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }
}

impl CaptureSource for StillImageSource {
    fn is_ready(&self) -> bool {
        !self.frame.is_empty()
    }

    fn capture(&mut self) -> Result<Option<Frame>, Error> {
        if self.frame.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.frame.clone()))
    }

    fn facing(&self) -> Facing {
        self.facing
    }
}
