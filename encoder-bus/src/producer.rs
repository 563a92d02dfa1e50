use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{error::StreamError, frame::Frame};

/// The render target a producer draws into once per tick.
pub trait Surface: Send + 'static {
    fn snapshot(&self) -> Frame;
}

type UpdateFn<S> = Box<dyn FnMut(&mut S) + Send>;
type FrameFn = Box<dyn FnMut(Frame) + Send>;

struct ProducerState<S> {
    surface: S,
    update: UpdateFn<S>,
    on_frame: FrameFn,
}

/// Calls the render callback every `1000 / frame_rate` ms and emits the
/// resulting frame. Runs free: nothing downstream can slow it down.
pub struct FrameProducer<S: Surface> {
    interval: Duration,
    state: Arc<Mutex<ProducerState<S>>>,
    frames: Arc<AtomicU64>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl<S: Surface> FrameProducer<S> {
    pub fn new(surface: S, frame_rate: u32) -> Result<Self, StreamError> {
        if frame_rate == 0 {
            return Err(StreamError::InvalidOptions(
                "frame rate must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(frame_rate)),
            state: Arc::new(Mutex::new(ProducerState {
                surface,
                update: Box::new(|_: &mut S| {}),
                on_frame: Box::new(|_| {}),
            })),
            frames: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        })
    }

    pub fn on_update(&self, f: impl FnMut(&mut S) + Send + 'static) {
        self.lock().update = Box::new(f);
    }

    pub fn on_frame(&self, f: impl FnMut(Frame) + Send + 'static) {
        self.lock().on_frame = Box::new(f);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frames emitted so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Renders and emits a single frame right now.
    pub fn tick(&self) -> Frame {
        step(&self.state, &self.frames)
    }

    /// Starts the timer. Must be called inside a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            log::warn!("producer: already started");
            return;
        }
        let state = Arc::clone(&self.state);
        let frames = Arc::clone(&self.frames);
        let cancel = self.cancel.clone();
        let period = self.interval;
        log::info!("producer: ticking every {:?}", period);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        step(&state, &frames);
                    }
                }
            }
            log::info!("producer: stopped");
        });
    }

    /// Stops the timer. No frame is emitted afterwards.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProducerState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Surface> Drop for FrameProducer<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn step<S: Surface>(state: &Mutex<ProducerState<S>>, frames: &AtomicU64) -> Frame {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    let ProducerState {
        surface,
        update,
        on_frame,
    } = &mut *state;
    update(surface);
    let frame = surface.snapshot();
    frames.fetch_add(1, Ordering::Relaxed);
    on_frame(frame.clone());
    frame
}

#[cfg(test)]
#[path = "producer_test.rs"]
mod producer_test;
