//! Errors reported by the stream controller.
//!
//! Only acquiring resources at start can fail. Estimation and framing always
//! produce a result, using `is_valid == false` for "no pitch".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The audio source could not be opened or started.
    #[error(transparent)]
    SourceUnavailable(#[from] anyhow::Error),

    /// The analysis thread for ring handoff could not be spawned.
    #[error("failed to spawn analysis worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}
