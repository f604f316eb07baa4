//! Destinations for pitch results.
//!
//! A sink is called from the analysis context, which may be a real-time audio
//! callback. Implementations should return quickly and must not block.

use crossbeam_channel::{Sender, TrySendError};

use crate::PitchResult;

/// Receives one result per completed analysis frame, in frame order.
pub trait PitchSink: Send + Sync + 'static {
    fn publish(&self, result: PitchResult);
}

/// Forwards results over a channel, dropping them if the channel is full.
impl PitchSink for Sender<PitchResult> {
    fn publish(&self, result: PitchResult) {
        match self.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("result channel full, dropping result"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// A sink backed by a closure. Build one with [`from_fn`].
pub struct FnSink<F>(F);

impl<F> PitchSink for FnSink<F>
where
    F: Fn(PitchResult) + Send + Sync + 'static,
{
    fn publish(&self, result: PitchResult) {
        (self.0)(result)
    }
}

/// Wraps a closure as a [`PitchSink`].
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(PitchResult) + Send + Sync + 'static,
{
    FnSink(f)
}
