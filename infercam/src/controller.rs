//! Loop controller driving capture, preprocessing, inference, post-processing and rendering.
//!
//! The controller is either `Idle` or `Running`. While running, a single task awaits the next
//! tick from the injected [`Scheduler`] and then runs one full tick before awaiting again, so
//! ticks are strictly sequential. Stopping cancels the pending wait, a tick in flight still
//! completes.
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError, TryLockError,
};

use anyhow::{Context, Result};
use camera::CaptureSource;
use common::{Results, TickResults};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::InferenceEngine,
    meter::METER,
    postproc::Postprocessor,
    preproc::Preprocessor,
    pubsub::OverlayPubSub,
    render::{as_jpeg_stream_item, encode_jpeg, Renderer},
    scheduler::Scheduler,
    status::Status,
    tensor::{ScopedOutput, ScopedTensor, TensorLedger},
};

const DEFAULT_JPEG_QUALITY: i32 = 85;

/// Readiness of the loop's dependencies, established before starting it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Readiness {
    pub model_loaded: bool,
    pub camera_acquired: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.model_loaded && self.camera_acquired
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopState {
    Idle,
    Running,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    EngineNotReady,
    VideoNotReady,
    FrameNotDecodable,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    Rendered,
    Skipped(SkipReason),
    /// Capture, inference or post-processing failed, the loop goes on.
    Failed,
    /// Another tick was still in flight.
    Busy,
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(JoinHandle<()>),
    AlreadyRunning,
    NotReady(Readiness),
}

/// Everything one tick needs, owned by the loop.
pub struct Pipeline {
    source: Box<dyn CaptureSource>,
    engine: Box<dyn InferenceEngine>,
    preprocessor: Preprocessor,
    postprocessor: Postprocessor,
    renderer: Renderer,
    pubsub: Arc<OverlayPubSub>,
    ledger: TensorLedger,
    jpeg_quality: i32,
    sequence: u64,
    video_ready: bool,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn CaptureSource>,
        engine: Box<dyn InferenceEngine>,
        preprocessor: Preprocessor,
        postprocessor: Postprocessor,
        renderer: Renderer,
        pubsub: Arc<OverlayPubSub>,
    ) -> Self {
        Self {
            source,
            engine,
            preprocessor,
            postprocessor,
            renderer,
            pubsub,
            ledger: TensorLedger::new(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            sequence: 0,
            video_ready: false,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: i32) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    /// Whether the source has delivered its first decodable frame.
    pub fn video_ready(&self) -> bool {
        self.video_ready
    }

    /// Run one capture→preprocess→infer→postprocess→render cycle.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.engine.is_ready() {
            return skipped(SkipReason::EngineNotReady);
        }

        let frame = match self.source.capture() {
            Ok(Some(frame)) => frame,
            Ok(None) => return skipped(SkipReason::VideoNotReady),
            Err(err) => {
                log::warn!("Failed to capture frame: {err}");
                METER.tick_failed();
                return TickOutcome::Failed;
            }
        };
        METER.tick_captured();
        if !self.video_ready && self.source.is_ready() {
            log::info!("Camera ready, first frame {}x{}", frame.width(), frame.height());
            self.video_ready = true;
        }

        let Some(input) = self.preprocessor.run(&frame, &self.ledger) else {
            return skipped(SkipReason::FrameNotDecodable);
        };

        let results = match self.infer(input, frame.dimensions()) {
            Ok(results) => results,
            Err(err) => {
                log::warn!("Skipping tick: {err:#}");
                METER.tick_failed();
                return TickOutcome::Failed;
            }
        };

        let canvas = self.renderer.render(&frame, &results);
        match encode_jpeg(&canvas, self.jpeg_quality) {
            Ok(jpeg) => self.pubsub.publish_frame(as_jpeg_stream_item(&jpeg)),
            Err(err) => log::warn!("Dropping rendered frame: {err:#}"),
        }

        self.sequence += 1;
        log::trace!("Tick {}: {} results", self.sequence, results.len());
        self.pubsub.publish_results(TickResults {
            sequence: self.sequence,
            results,
        });
        METER.tick_rendered();

        TickOutcome::Rendered
    }

    /// Hand the input to the engine and post-process its outputs.
    ///
    /// Output tensors are released when this returns, on success and on error.
    fn infer(&mut self, input: ScopedTensor, frame_size: (u32, u32)) -> Result<Results> {
        let outputs: Vec<ScopedOutput> = self
            .engine
            .infer(input.into_inner())
            .context("inference failed")?
            .into_iter()
            .map(|output| self.ledger.scope(output))
            .collect();

        self.postprocessor
            .run(&outputs, frame_size)
            .context("post-processing failed")
    }
}

fn skipped(reason: SkipReason) -> TickOutcome {
    log::debug!("Skipping tick: {reason:?}");
    METER.tick_skipped();
    TickOutcome::Skipped(reason)
}

pub struct LoopController {
    pipeline: Mutex<Pipeline>,
    ledger: TensorLedger,
    pubsub: Arc<OverlayPubSub>,
    running: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    completed_ticks: AtomicU64,
}

impl LoopController {
    pub fn new(pipeline: Pipeline) -> Arc<Self> {
        let ledger = pipeline.ledger().clone();
        let pubsub = Arc::clone(&pipeline.pubsub);
        Arc::new(Self {
            pipeline: Mutex::new(pipeline),
            ledger,
            pubsub,
            running: AtomicBool::new(false),
            cancel: Mutex::new(None),
            completed_ticks: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> LoopState {
        match self.running.load(Ordering::Acquire) {
            true => LoopState::Running,
            false => LoopState::Idle,
        }
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    /// Number of ticks that ran to an outcome, busy ticks excluded.
    pub fn completed_ticks(&self) -> u64 {
        self.completed_ticks.load(Ordering::Acquire)
    }

    /// Start the loop on the current runtime.
    ///
    /// Starting requires both the model and the camera to be ready, and is a no-op while the
    /// loop is already running.
    pub fn start<S>(self: &Arc<Self>, readiness: Readiness, scheduler: S) -> StartOutcome
    where
        S: Scheduler + 'static,
    {
        if !readiness.is_ready() {
            log::warn!("Not starting loop, dependencies not ready: {readiness:?}");
            return StartOutcome::NotReady(readiness);
        }

        // The token is stored before `stop` can observe the running state
        let mut slot = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!("Loop already running");
            return StartOutcome::AlreadyRunning;
        }

        let cancel = CancellationToken::new();
        *slot = Some(cancel.clone());
        drop(slot);

        self.pubsub.set_status(Status::Running);
        let controller = Arc::clone(self);
        StartOutcome::Started(tokio::spawn(async move {
            controller.run(scheduler, cancel).await
        }))
    }

    /// Cancel the pending next tick, returns whether the loop was running.
    ///
    /// A tick in flight completes, the loop is `Idle` once its task has returned.
    pub fn stop(&self) -> bool {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match cancel {
            Some(cancel) => {
                log::info!("Stopping loop");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a single tick unless one is already in flight.
    pub fn try_tick(&self) -> TickOutcome {
        let mut pipeline = match self.pipeline.try_lock() {
            Ok(pipeline) => pipeline,
            Err(TryLockError::WouldBlock) => {
                log::debug!("Tick still in flight");
                return TickOutcome::Busy;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let outcome = pipeline.tick();
        self.completed_ticks.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn run<S: Scheduler>(&self, mut scheduler: S, cancel: CancellationToken) {
        log::info!("Loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = scheduler.wait() => {}
            }

            self.try_tick();

            if cancel.is_cancelled() {
                break;
            }
        }

        self.running.store(false, Ordering::Release);
        self.pubsub.set_status(Status::Stopped);
        log::info!(
            "Loop stopped after {} ticks, {} tensors live",
            self.completed_ticks(),
            self.ledger.live()
        );
    }
}

#[cfg(test)]
mod test {
    use super::Readiness;

    #[test]
    fn test_readiness_needs_model_and_camera() {
        assert!(!Readiness::default().is_ready());
        assert!(!Readiness {
            model_loaded: true,
            camera_acquired: false
        }
        .is_ready());
        assert!(Readiness {
            model_loaded: true,
            camera_acquired: true
        }
        .is_ready());
    }
}
