//! # Stream Controller Module
//!
//! Owns the start/stop lifecycle of one pitch-tracking session and wires an
//! audio source to a result sink.
//!
//! ## Architecture
//! - **Direct handoff**: frames are analysed inside the source's delivery
//!   callback
//! - **Worker handoff**: the callback writes into a [`SampleRing`] and rings a
//!   doorbell; a dedicated analysis thread drains the ring
//! - **Start/stop**: serialized by a mutex that the data path never touches
//! - **Threshold**: shared through an atomic, picked up before each frame
//!
//! Do not call [`StreamController::stop`] from inside a sink; it waits for
//! in-flight analysis to finish.

use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{DeliverFn, SampleSource, SourceRequest};
use crate::config::{
    AnalysisConfig, DEFAULT_BUFFER_SIZE, DEFAULT_THRESHOLD, Handoff, StreamOptions,
    clamp_threshold,
};
use crate::error::StreamError;
use crate::framing::PitchPipeline;
use crate::ring::SampleRing;
use crate::sink::PitchSink;

/// A threshold readable from the analysis context without locking.
#[derive(Debug)]
struct SharedThreshold(AtomicU64);

impl SharedThreshold {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Lets `stop` wait out analysis that is already running.
///
/// Analysis enters the gate before touching samples and re-checks `active`
/// before publishing each result. `close` flips `active` and then waits until
/// nobody is inside, so nothing is published after it returns.
#[derive(Debug)]
struct SessionGate {
    active: AtomicBool,
    in_flight: AtomicUsize,
}

struct GateGuard<'a>(&'a SessionGate);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionGate {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn enter(&self) -> Option<GateGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = GateGuard(self);
        if self.active.load(Ordering::SeqCst) {
            Some(guard)
        } else {
            None
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.active.store(false, Ordering::SeqCst);
        while self.in_flight.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
    }
}

/// Everything the analysis context owns for one session.
struct Analysis {
    pipeline: PitchPipeline,
    gate: Arc<SessionGate>,
    threshold: Arc<SharedThreshold>,
    sink: Arc<dyn PitchSink>,
}

impl Analysis {
    fn feed(&mut self, samples: &[f32]) {
        let Some(_guard) = self.gate.enter() else {
            return;
        };

        let gate = &self.gate;
        let sink = &self.sink;
        let threshold = &self.threshold;
        self.pipeline.ingest_with_threshold(
            samples,
            || threshold.load(),
            |result| {
                if gate.is_active() {
                    sink.publish(result);
                }
            },
        );
    }
}

/// Analysis thread used with [`Handoff::Worker`].
struct AnalysisWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    fn spawn(
        ring: Arc<SampleRing>,
        doorbell: Receiver<()>,
        mut analysis: Analysis,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let chunk = analysis.pipeline.accumulator().hop_size().max(256);

        let handle = thread::Builder::new()
            .name("pitch-analysis".into())
            .spawn(move || {
                let mut scratch = vec![0.0f32; chunk];
                loop {
                    select! {
                        recv(doorbell) -> msg => {
                            if msg.is_err() {
                                break;
                            }
                            drain(&ring, &mut scratch, &mut analysis);
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("analysis worker exiting");
            })?;

        Ok(Self {
            shutdown_tx,
            thread_handle: Some(handle),
        })
    }

    fn shutdown(mut self) {
        let _ = self.shutdown_tx.try_send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::warn!("analysis worker panicked");
            }
        }
    }
}

fn drain(ring: &SampleRing, scratch: &mut [f32], analysis: &mut Analysis) {
    loop {
        let read = ring.read(scratch);
        if read == 0 {
            break;
        }
        analysis.feed(&scratch[..read]);
    }

    let dropped = ring.take_dropped();
    if dropped > 0 {
        log::warn!("sample ring overrun, {} samples dropped", dropped);
    }
}

struct Session {
    gate: Arc<SessionGate>,
    worker: Option<AnalysisWorker>,
}

enum StreamState {
    Stopped,
    Running(Session),
}

struct Inner<S> {
    source: S,
    state: StreamState,
    config: AnalysisConfig,
}

/// Start/stop/threshold control over one pitch-tracking session.
///
/// Each controller owns its own source, estimator and accumulator, so several
/// controllers can run side by side.
pub struct StreamController<S: SampleSource> {
    inner: Mutex<Inner<S>>,
    sink: Arc<dyn PitchSink>,
    threshold: Arc<SharedThreshold>,
}

impl<S: SampleSource> StreamController<S> {
    /// Creates a stopped controller.
    pub fn new<K: PitchSink>(source: S, sink: K) -> Self {
        Self {
            inner: Mutex::new(Inner {
                source,
                state: StreamState::Stopped,
                config: AnalysisConfig::default(),
            }),
            sink: Arc::new(sink),
            threshold: Arc::new(SharedThreshold::new(DEFAULT_THRESHOLD)),
        }
    }

    /// Starts streaming with the given frame length and threshold.
    ///
    /// Returns true when running, including when already running. Failures are
    /// logged and leave the controller stopped.
    pub fn start(&self, buffer_size: usize, threshold: f64) -> bool {
        let options = StreamOptions {
            buffer_size: Some(buffer_size),
            threshold: Some(threshold),
            ..StreamOptions::default()
        };
        match self.try_start(options) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("failed to start pitch stream: {}", err);
                false
            }
        }
    }

    /// Starts streaming, reporting why acquisition failed.
    ///
    /// A no-op when already running. Missing options fall back to a
    /// [`DEFAULT_BUFFER_SIZE`] frame and the current threshold.
    pub fn try_start(&self, options: StreamOptions) -> Result<(), StreamError> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, StreamState::Running(_)) {
            return Ok(());
        }

        if let Some(threshold) = options.threshold {
            self.threshold.store(clamp_threshold(threshold));
        }
        let requested = AnalysisConfig::new(
            options.sample_rate,
            options.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            self.threshold.load(),
        );
        let request = SourceRequest {
            sample_rate: options.sample_rate,
            frames_per_callback: requested.hop_size,
        };

        let sample_rate = match inner.source.open(&request) {
            Ok(rate) => rate,
            Err(err) => {
                inner.source.close();
                return Err(err.into());
            }
        };
        let config = AnalysisConfig {
            sample_rate,
            ..requested
        };

        let gate = Arc::new(SessionGate::new());
        let mut analysis = Analysis {
            pipeline: PitchPipeline::new(&config),
            gate: Arc::clone(&gate),
            threshold: Arc::clone(&self.threshold),
            sink: Arc::clone(&self.sink),
        };

        let (deliver, worker): (DeliverFn, Option<AnalysisWorker>) = match options.handoff {
            Handoff::Direct => {
                let deliver: DeliverFn = Box::new(move |samples: &[f32]| analysis.feed(samples));
                (deliver, None)
            }
            Handoff::Worker { ring_capacity } => {
                let ring = Arc::new(SampleRing::new(ring_capacity.max(config.frame_size)));
                let (doorbell_tx, doorbell_rx) = crossbeam_channel::bounded(1);
                let worker = match AnalysisWorker::spawn(Arc::clone(&ring), doorbell_rx, analysis) {
                    Ok(worker) => worker,
                    Err(err) => {
                        inner.source.close();
                        return Err(StreamError::WorkerSpawn(err));
                    }
                };
                let deliver: DeliverFn = Box::new(move |samples: &[f32]| {
                    ring.write(samples);
                    let _ = doorbell_tx.try_send(());
                });
                (deliver, Some(worker))
            }
        };

        if let Err(err) = inner.source.begin(deliver) {
            gate.close();
            inner.source.close();
            if let Some(worker) = worker {
                worker.shutdown();
            }
            return Err(err.into());
        }

        log::info!(
            "pitch detector started at {:.2} Hz, buffer {}, hop {}",
            config.sample_rate,
            config.frame_size,
            config.hop_size
        );
        inner.config = config;
        inner.state = StreamState::Running(Session { gate, worker });
        Ok(())
    }

    /// Stops streaming. Returns false if already stopped.
    ///
    /// No result is published after this returns.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        let session = match std::mem::replace(&mut inner.state, StreamState::Stopped) {
            StreamState::Running(session) => session,
            StreamState::Stopped => return false,
        };

        session.gate.close();
        inner.source.close();
        if let Some(worker) = session.worker {
            worker.shutdown();
        }

        log::info!("pitch detector stopped");
        true
    }

    /// Sets the YIN threshold, clamped into range.
    ///
    /// While running it applies from the next frame analysed, even one
    /// completed by the chunk currently being processed; while stopped it is
    /// used by the next start that does not pass its own threshold.
    pub fn set_threshold(&self, threshold: f64) {
        self.threshold.store(clamp_threshold(threshold));
    }

    /// Returns the threshold the next analysed frame will use.
    ///
    /// # Returns
    /// A value in `[MIN_THRESHOLD, MAX_THRESHOLD]`; the default until a start or
    /// [`set_threshold`](Self::set_threshold) supplies one.
    pub fn threshold(&self) -> f64 {
        self.threshold.load()
    }

    /// True between a successful start and the matching stop.
    pub fn is_running(&self) -> bool {
        matches!(self.inner.lock().state, StreamState::Running(_))
    }

    /// Sample rate of the current or most recent stream.
    ///
    /// [`DEFAULT_SAMPLE_RATE`](crate::config::DEFAULT_SAMPLE_RATE) before the first start.
    pub fn sample_rate(&self) -> f64 {
        self.inner.lock().config.sample_rate
    }

    /// Analysis frame length of the current or most recent stream.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().config.frame_size
    }

    /// Distance between consecutive frame starts: half of
    /// [`buffer_size`](Self::buffer_size).
    pub fn hop_size(&self) -> usize {
        self.inner.lock().config.hop_size
    }
}

impl<S: SampleSource> Drop for StreamController<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
