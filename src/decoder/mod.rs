//! The decoder capability consumed by the streaming engine.
//!
//! A decoder produces interleaved linear PCM on demand. The engine never
//! cares what container or codec sits behind it: music owns one decoder
//! for the whole stream, the track player owns one per subtitle page (see
//! [`clip::ClipDecoder`]), and sound effects drain theirs once up front
//! via [`Decoder::decode_all`].
//!
//! End-of-stream is not an `Err`: `decode` returns the bytes it could
//! produce (possibly zero) and [`Decoder::status`] reports
//! [`DecoderStatus::EndOfStream`] afterwards. A looping decoder instead
//! rewinds itself when it reaches the end and keeps producing.

mod clip;
mod memory;
mod symphonia;

pub use clip::ClipDecoder;
pub use memory::MemoryDecoder;
pub use symphonia::{FileLoader, SymphoniaDecoder};

use std::sync::Arc;

use parking_lot::Mutex;

/// Decoder failure kinds.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecoderError {
    /// The source has no more audio. Internal marker for
    /// [`DecoderStatus::EndOfStream`]; `decode` itself reports EOF via a
    /// short read, not via this variant.
    #[error("end of stream")]
    EndOfStream,

    /// Could not open or probe the source
    #[error("unsupported or corrupt source: {0}")]
    Format(String),

    /// Decoding failed mid-stream
    #[error("decode failed: {0}")]
    Decode(String),

    /// Seek/rewind failed
    #[error("seek failed: {0}")]
    Seek(String),

    /// Source not found
    #[error("sound not found: {0}")]
    NotFound(String),
}

/// What a decoder reports between `decode` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderStatus {
    /// More audio is available
    #[default]
    Ready,
    /// The last `decode` consumed the final bytes
    EndOfStream,
    /// The decoder hit a non-recoverable error
    Failed,
}

/// Sample layout of the PCM a decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Bits per sample: 8 (unsigned) or 16 (signed, native-endian)
    pub bits: u16,
    /// Interleaved channels: 1 or 2
    pub channels: u16,
}

impl PcmFormat {
    pub const MONO_8: Self = Self { bits: 8, channels: 1 };
    pub const MONO_16: Self = Self { bits: 16, channels: 1 };
    pub const STEREO_8: Self = Self { bits: 8, channels: 2 };
    pub const STEREO_16: Self = Self { bits: 16, channels: 2 };

    /// Bytes per single-channel sample.
    pub fn sample_bytes(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Bytes per full frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.sample_bytes() * self.channels as usize
    }

    /// Bytes covered by `ms` milliseconds of audio at `frequency`.
    pub fn bytes_for_ms(&self, frequency: u32, ms: u32) -> usize {
        let frames = frequency as u64 * ms as u64 / 1000;
        frames as usize * self.frame_bytes()
    }
}

/// A source of decoded PCM.
pub trait Decoder: Send {
    /// Decode up to `out.len()` bytes of PCM into `out`, returning the
    /// byte count produced. A return of less than `out.len()` (including
    /// zero) with [`DecoderStatus::EndOfStream`] is the normal end path.
    fn decode(&mut self, out: &mut [u8]) -> Result<usize, DecoderError>;

    /// Reset to the start of the stream.
    fn rewind(&mut self) -> Result<(), DecoderError>;

    /// Seek to `pos_ms` milliseconds from the start; returns the position
    /// actually reached.
    fn seek(&mut self, pos_ms: u32) -> Result<u32, DecoderError>;

    /// Current position in seconds from the start.
    fn time(&self) -> f32;

    /// Total length in seconds, if finite.
    fn length(&self) -> f32;

    /// Sample frequency in Hz.
    fn frequency(&self) -> u32;

    /// PCM layout of the produced bytes.
    fn format(&self) -> PcmFormat;

    /// Whether the decoder rewinds itself at end of stream.
    fn is_looping(&self) -> bool;

    /// Change the looping behavior; observed at the next end of stream.
    fn set_looping(&mut self, looping: bool);

    /// Status after the last operation.
    fn status(&self) -> DecoderStatus;

    /// Decode the entire remaining stream into one buffer. Used for
    /// sound-effect pre-decode.
    fn decode_all(&mut self) -> Result<Vec<u8>, DecoderError> {
        let mut all = Vec::new();
        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            let n = self.decode(&mut chunk)?;
            all.extend_from_slice(&chunk[..n]);
            if self.status() == DecoderStatus::EndOfStream || n == 0 {
                break;
            }
        }
        Ok(all)
    }
}

/// A decoder shared between its owner (a chunk or a music handle) and the
/// sample bound to a source slot. Locked only while the slot mutex is
/// already held, so the inner lock never contends.
pub type SharedDecoder = Arc<Mutex<Box<dyn Decoder>>>;

/// Wrap a decoder for sharing with a bound sample.
pub fn share(decoder: Box<dyn Decoder>) -> SharedDecoder {
    Arc::new(Mutex::new(decoder))
}

/// Opens decoders by resource name. The resource system behind it (disk,
/// archive, pack file) is the embedder's business.
pub trait SoundLoader: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn Decoder>, DecoderError>;
}
