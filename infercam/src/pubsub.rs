//! Fan-out of rendered frames, results and status to HTTP clients.
//!
use bytes::Bytes;
use common::TickResults;
use tokio::sync::{broadcast, watch};

use crate::status::Status;

pub type BytesSender = broadcast::Sender<Bytes>;
pub type BytesReceiver = broadcast::Receiver<Bytes>;

/// Number of rendered frames buffered for slow stream clients.
const FRAME_CAPACITY: usize = 20;

pub struct OverlayPubSub {
    frames: BytesSender,
    results: watch::Sender<Option<TickResults>>,
    status: watch::Sender<Status>,
}

impl OverlayPubSub {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_CAPACITY);
        let (results, _) = watch::channel(None);
        let (status, _) = watch::channel(Status::LoadingModel);
        Self {
            frames,
            results,
            status,
        }
    }

    /// Publish a rendered frame, already wrapped as a stream item.
    pub fn publish_frame(&self, item: Bytes) {
        // Fails only without subscribers
        self.frames.send(item).ok();
    }

    pub fn publish_results(&self, results: TickResults) {
        self.results.send_replace(Some(results));
    }

    pub fn set_status(&self, status: Status) {
        log::info!("Status: {status}");
        self.status.send_replace(status);
    }

    pub fn subscribe_frames(&self) -> BytesReceiver {
        self.frames.subscribe()
    }

    pub fn latest_results(&self) -> Option<TickResults> {
        self.results.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }
}

impl Default for OverlayPubSub {
    fn default() -> Self {
        Self::new()
    }
}
