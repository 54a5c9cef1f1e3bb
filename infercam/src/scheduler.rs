//! Tick sources driving the inference loop.
//!
use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::Notify,
    time::{interval, Interval, MissedTickBehavior},
};

/// Decides when the next loop tick runs.
pub trait Scheduler: Send {
    /// Resolve once the next tick is due.
    fn wait(&mut self) -> BoxFuture<'_, ()>;
}

/// Fixed cadence.
///
/// Ticks that are missed because a tick ran long are delayed, never bursted.
pub struct IntervalScheduler {
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }
}

impl Scheduler for IntervalScheduler {
    fn wait(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // Created on first use, an interval needs a running runtime
            let period = self.period;
            let interval = self.interval.get_or_insert_with(|| {
                let mut interval = interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            interval.tick().await;
        })
    }
}

/// Ticks only when a consumer asks for the next frame.
///
/// Requests made while no tick is pending coalesce into a single tick.
pub struct FrameCallbackScheduler {
    notify: Arc<Notify>,
}

/// Handle to request the next frame from a [`FrameCallbackScheduler`].
#[derive(Clone)]
pub struct FrameRequester {
    notify: Arc<Notify>,
}

impl FrameRequester {
    pub fn request_frame(&self) {
        self.notify.notify_one();
    }
}

/// Create a frame-callback scheduler and the handle requesting its ticks.
pub fn frame_callback() -> (FrameRequester, FrameCallbackScheduler) {
    let notify = Arc::new(Notify::new());
    (
        FrameRequester {
            notify: Arc::clone(&notify),
        },
        FrameCallbackScheduler { notify },
    )
}

impl Scheduler for FrameCallbackScheduler {
    fn wait(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.notify.notified().await })
    }
}
