//! # Audio Source Module
//!
//! The boundary between the pitch pipeline and whatever produces samples.
//! The controller only needs three things from a source: open it at a
//! requested configuration, start delivering mono `f32` chunks into a
//! callback, and close it again.
//!
//! ## Sources
//! - [`PushSource`]: the host pushes samples itself through a [`PushFeed`],
//!   e.g. from a platform audio callback or from a decoded file
//! - `CpalSource` (feature `cpal`): the default input device via CPAL

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::sync::Arc;

/// Callback receiving chunks of mono samples in [-1.0, 1.0].
pub type DeliverFn = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// What the controller asks of a source when a stream starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRequest {
    /// Preferred sample rate in Hz. The source may choose another one.
    pub sample_rate: f64,
    /// Preferred callback size in samples; a hint only.
    pub frames_per_callback: usize,
}

/// A producer of mono audio samples.
pub trait SampleSource {
    /// Acquires the underlying device. Returns the actual sample rate.
    fn open(&mut self, request: &SourceRequest) -> Result<f64>;

    /// Starts delivering samples into `deliver`.
    ///
    /// Only called after a successful [`open`](Self::open).
    fn begin(&mut self, deliver: DeliverFn) -> Result<()>;

    /// Stops delivery and releases the device.
    ///
    /// Once this returns `deliver` is never invoked again. Must be idempotent.
    fn close(&mut self);
}

type DeliverSlot = Arc<Mutex<Option<DeliverFn>>>;

/// A source driven by the host through a [`PushFeed`].
pub struct PushSource {
    sample_rate: f64,
    slot: DeliverSlot,
}

/// Handle used by the host to deliver samples into a [`PushSource`].
///
/// Each [`push`](Self::push) holds a mutex for the whole delivery, and
/// [`SampleSource::close`] takes the same mutex. That is what lets `close`
/// wait for a delivery already in progress, so no sample reaches a stopped
/// stream. The cost is that a push can block while the controller is starting
/// or stopping. A host that pushes from a real-time audio thread and cannot
/// tolerate that should implement [`SampleSource`] over its own callback
/// instead, or start the controller with
/// [`Handoff::Worker`](crate::config::Handoff::Worker) so the work done under
/// the lock is a ring write.
#[derive(Clone)]
pub struct PushFeed {
    slot: DeliverSlot,
}

impl PushSource {
    /// Creates a source producing audio at `sample_rate` Hz and its feed.
    pub fn new(sample_rate: f64) -> (Self, PushFeed) {
        let slot: DeliverSlot = Arc::new(Mutex::new(None));
        let feed = PushFeed {
            slot: Arc::clone(&slot),
        };
        (Self { sample_rate, slot }, feed)
    }
}

impl SampleSource for PushSource {
    fn open(&mut self, _request: &SourceRequest) -> Result<f64> {
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            return Err(anyhow!("invalid sample rate {}", self.sample_rate));
        }
        Ok(self.sample_rate)
    }

    fn begin(&mut self, deliver: DeliverFn) -> Result<()> {
        *self.slot.lock() = Some(deliver);
        Ok(())
    }

    fn close(&mut self) {
        self.slot.lock().take();
    }
}

impl PushFeed {
    /// Delivers a chunk of samples.
    ///
    /// # Arguments
    /// * `samples` - Mono samples in [-1.0, 1.0]
    ///
    /// # Returns
    /// False, discarding the samples, when no stream is running. Blocks while
    /// the source is being closed.
    pub fn push(&self, samples: &[f32]) -> bool {
        match self.slot.lock().as_mut() {
            Some(deliver) => {
                deliver(samples);
                true
            }
            None => false,
        }
    }
}

#[cfg(feature = "cpal")]
pub use self::capture::CpalSource;

#[cfg(feature = "cpal")]
mod capture {
    use super::{DeliverFn, SampleSource, SourceRequest};
    use anyhow::{Result, anyhow};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SupportedStreamConfigRange;

    /// Captures from the default input device.
    ///
    /// Only mono 32-bit float configurations are considered.
    #[derive(Default)]
    pub struct CpalSource {
        device: Option<cpal::Device>,
        config: Option<cpal::StreamConfig>,
        stream: Option<cpal::Stream>,
    }

    impl CpalSource {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl SampleSource for CpalSource {
        fn open(&mut self, request: &SourceRequest) -> Result<f64> {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;

            log::info!("Using audio input device: {}", device.name()?);

            let target_rate = request.sample_rate.round().max(1.0) as u32;
            let configs = device.supported_input_configs()?.collect::<Vec<_>>();
            let supported = find_supported_config(configs, target_rate)
                .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

            let rate = target_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
            let config: cpal::StreamConfig =
                supported.with_sample_rate(cpal::SampleRate(rate)).into();

            log::info!("Selected sample rate: {} Hz", rate);

            self.device = Some(device);
            self.config = Some(config);
            Ok(f64::from(rate))
        }

        fn begin(&mut self, mut deliver: DeliverFn) -> Result<()> {
            let (device, config) = match (&self.device, &self.config) {
                (Some(device), Some(config)) => (device, config),
                _ => return Err(anyhow!("input device not opened")),
            };

            let err_fn = |err| log::warn!("An error occurred on the audio stream: {}", err);
            let stream = device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data),
                err_fn,
                None,
            )?;

            stream.play()?;
            self.stream = Some(stream);
            Ok(())
        }

        fn close(&mut self) {
            // Dropping the stream stops the callback.
            self.stream = None;
            self.config = None;
            self.device = None;
        }
    }

    /// Picks the mono f32 configuration whose rate range is closest to `target_rate`.
    fn find_supported_config(
        configs: Vec<SupportedStreamConfigRange>,
        target_rate: u32,
    ) -> Option<SupportedStreamConfigRange> {
        configs
            .into_iter()
            .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
            .min_by_key(|c| {
                let min = c.min_sample_rate().0;
                let max = c.max_sample_rate().0;
                if (min..=max).contains(&target_rate) {
                    0
                } else {
                    (min as i64 - target_rate as i64)
                        .abs()
                        .min((max as i64 - target_rate as i64).abs())
                }
            })
    }
}
