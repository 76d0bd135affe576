//! Crate-wide error types.
//!
//! Library modules surface specific error types via `thiserror`
//! ([`MixerError`], [`DecoderError`]); the top-level [`Error`] aggregates
//! them for callers that treat the runtime as one subsystem.
//!
//! Failure policy: caller-invoked operations return a discriminated
//! [`Result`]; the streaming task recovers locally (underruns, backend
//! hiccups) and reports through `tracing` rather than by failing calls.

use crate::decoder::DecoderError;
use crate::mixer::MixerError;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level runtime error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (task spawn, resource access)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Mixer backend failure
    #[error("mixer error: {0}")]
    Mixer(#[from] MixerError),

    /// Decoder failure
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// An operation was invoked without its preconditions (bad channel
    /// index, no sample bound, empty track list). Soft failure: the
    /// operation was a no-op.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Another load was already in progress when a load was requested.
    #[error("a resource load is already in progress")]
    ConcurrentLoad,

    /// The runtime is shutting down.
    #[error("sound system is shut down")]
    Shutdown,
}

impl Error {
    /// Create an invalid-state error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}
