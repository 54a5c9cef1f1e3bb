//! Visible status of the demo.
//!
use std::fmt;

/// What the UI shows next to the stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Status {
    LoadingModel,
    AcquiringCamera,
    /// Model and camera are up, waiting for the loop to start.
    Ready,
    Running,
    Stopped,
    CameraUnavailable(String),
    ModelLoadFailed(String),
}

impl Status {
    /// Whether the loop can never start in this state.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Status::CameraUnavailable(_) | Status::ModelLoadFailed(_)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::LoadingModel => write!(f, "Loading model..."),
            Status::AcquiringCamera => write!(f, "Starting camera..."),
            Status::Ready => write!(f, "Ready"),
            Status::Running => write!(f, "Running"),
            Status::Stopped => write!(f, "Stopped"),
            Status::CameraUnavailable(reason) => write!(f, "Camera unavailable: {reason}"),
            Status::ModelLoadFailed(reason) => write!(f, "Failed to load model: {reason}"),
        }
    }
}
