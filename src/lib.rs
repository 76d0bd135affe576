//! soundstage - a real-time audio streaming and mixing runtime.
//!
//! Streams music and dialogue into a fixed pool of mixer sources, plays
//! pre-decoded positional sound effects, synchronizes subtitles to audio
//! through buffer tags, ramps music volume on a deadline, and feeds an
//! oscilloscope with the samples the listener is hearing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Game Logic (Caller Thread)                   │
//! │   stream control, track splicing, effect channels, queries      │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ per-slot mutexes
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Streaming Task (Worker Thread)                 │
//! │   recycles played buffers through decoders, fires callbacks,    │
//! │   feeds scope rings, steps music fades                          │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ queue / unqueue
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Mixer Backend (trait object)                   │
//! │        sources, buffers, gain, 3D position, mixing              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mixer backend and the audio decoders are capabilities the embedder
//! provides ([`mixer::Mixer`], [`decoder::Decoder`]); the crate ships a
//! symphonia-backed decoder and file loader, and a scriptable mock mixer
//! for tests (feature `mock-mixer`).
//!
//! # Debugging
//!
//! Log targets, per concern:
//! - `stream::control` — caller-thread stream transitions
//! - `stream::task` — the worker's recycle loop, underruns
//! - `track::splice` / `track::play` — dialogue track assembly, playback
//! - `sfx` — effect channels and banks

pub mod config;
pub mod decoder;
pub mod error;
pub mod mixer;
pub mod sfx;
pub mod stream;
pub mod system;
#[cfg(test)]
pub mod test_utils;
pub mod time;
pub mod track;

pub use config::SoundConfig;
pub use error::{Error, Result};
pub use sfx::{SoundBank, SoundPos};
pub use stream::{
    MAX_VOLUME, MUSIC_BUFFERS, MUSIC_SOURCE, NORMAL_VOLUME, NUM_SFX_CHANNELS, NUM_SOURCES,
    NoCallbacks, SPEECH_BUFFERS, SPEECH_SOURCE, Sample, StreamCallbacks, TagPayload,
};
pub use system::{Music, SoundSystem};
pub use time::{Clock, ManualClock, MonotonicClock, TIME_UNITS_PER_SECOND, Ticks};
pub use track::{ChunkCallback, SCROLL_STEP, SubtitleRef};
