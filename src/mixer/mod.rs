//! The mixer-backend capability consumed by the runtime.
//!
//! The backend owns the actual mixing: sources play queues of uploaded PCM
//! buffers, with per-source gain and 3D position. The shape follows the
//! OpenAL model: sources move through Initial/Playing/Paused/Stopped,
//! queued buffers become "processed" once played (stopping a source marks
//! its whole queue processed), and processed buffers can be unqueued and
//! refilled.
//!
//! Backend errors are surfaced to the runtime, which logs and carries on;
//! a mixer hiccup costs a buffer, not the stream.

#[cfg(any(test, feature = "mock-mixer"))]
pub mod mock;

use std::sync::Arc;

use crate::decoder::PcmFormat;

/// Handle to a mixer source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u32);

/// Handle to a mixer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Playback state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    /// Freshly created or rewound
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Mixer backend failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MixerError {
    #[error("no such source: {0:?}")]
    BadSource(SourceId),

    #[error("no such buffer: {0:?}")]
    BadBuffer(BufferId),

    #[error("buffer not ready to unqueue")]
    BufferBusy,

    #[error("backend failure: {0}")]
    Backend(String),
}

/// An OpenAL-shaped mixing backend.
///
/// Implementations handle their own synchronization; the runtime calls in
/// from both the caller thread and the streaming task.
pub trait Mixer: Send + Sync {
    // Source lifecycle
    fn new_source(&self) -> Result<SourceId, MixerError>;
    fn delete_source(&self, source: SourceId) -> Result<(), MixerError>;

    // Transport
    fn play(&self, source: SourceId) -> Result<(), MixerError>;
    fn stop(&self, source: SourceId) -> Result<(), MixerError>;
    fn pause(&self, source: SourceId) -> Result<(), MixerError>;
    fn rewind(&self, source: SourceId) -> Result<(), MixerError>;

    // Queue management
    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> Result<(), MixerError>;
    fn unqueue_buffers(&self, source: SourceId, count: usize)
    -> Result<Vec<BufferId>, MixerError>;

    // Source properties
    fn set_gain(&self, source: SourceId, gain: f32) -> Result<(), MixerError>;
    fn set_looping(&self, source: SourceId, looping: bool) -> Result<(), MixerError>;
    fn set_position(&self, source: SourceId, position: [f32; 3]) -> Result<(), MixerError>;
    /// Bind a single static buffer (sound-effect path), or clear it.
    fn set_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), MixerError>;

    // Source queries
    fn source_state(&self, source: SourceId) -> Result<SourceState, MixerError>;
    fn buffers_queued(&self, source: SourceId) -> Result<usize, MixerError>;
    fn buffers_processed(&self, source: SourceId) -> Result<usize, MixerError>;

    // Buffers
    fn new_buffer(&self) -> Result<BufferId, MixerError>;
    fn delete_buffer(&self, buffer: BufferId) -> Result<(), MixerError>;
    fn upload(
        &self,
        buffer: BufferId,
        format: PcmFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<(), MixerError>;
    fn buffer_size(&self, buffer: BufferId) -> Result<usize, MixerError>;
}

/// Shared handle to a mixer backend.
pub type SharedMixer = Arc<dyn Mixer>;
