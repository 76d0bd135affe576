//! Test fixtures: scripted decoders, an in-memory loader, and a fully
//! mocked engine rig.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{TestRig, scripted_sample};
//!
//! let rig = TestRig::new();
//! let sample = scripted_sample(&rig, 8, 44100);
//! // drive stream control / the task against rig.mixer and rig.clock
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, unbounded};

use crate::config::SoundConfig;
use crate::decoder::{Decoder, DecoderError, DecoderStatus, PcmFormat, SoundLoader, share};
use crate::mixer::mock::MockMixer;
use crate::stream::task::TaskSignal;
use crate::stream::{NoCallbacks, Sample, Shared};
use crate::time::ManualClock;

/// Deterministic PCM source: `total` bytes of a position-derived pattern,
/// so rewinds and seeks are byte-exact. Optionally fails at a byte
/// position to script decoder breakdown.
pub struct ScriptedDecoder {
    total: usize,
    pos: usize,
    frequency: u32,
    format: PcmFormat,
    looping: bool,
    status: DecoderStatus,
    fail_at: Option<usize>,
}

impl ScriptedDecoder {
    pub fn new(total_bytes: usize, frequency: u32, format: PcmFormat) -> Self {
        Self {
            total: total_bytes,
            pos: 0,
            frequency,
            format,
            looping: false,
            status: if total_bytes == 0 {
                DecoderStatus::EndOfStream
            } else {
                DecoderStatus::Ready
            },
            fail_at: None,
        }
    }

    /// Fail with a decode error once `byte_pos` is reached.
    pub fn failing_at(mut self, byte_pos: usize) -> Self {
        self.fail_at = Some(byte_pos);
        self
    }

    fn byte_rate(&self) -> usize {
        self.frequency as usize * self.format.frame_bytes()
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&mut self, out: &mut [u8]) -> Result<usize, DecoderError> {
        if let Some(fail) = self.fail_at
            && self.pos >= fail
        {
            self.status = DecoderStatus::Failed;
            return Err(DecoderError::Decode("scripted failure".into()));
        }
        let mut written = 0;
        while written < out.len() {
            if self.pos >= self.total {
                if self.looping && self.total > 0 {
                    self.pos = 0;
                    continue;
                }
                self.status = DecoderStatus::EndOfStream;
                break;
            }
            let mut n = (self.total - self.pos).min(out.len() - written);
            if let Some(fail) = self.fail_at {
                n = n.min(fail.saturating_sub(self.pos));
                if n == 0 {
                    break;
                }
            }
            for i in 0..n {
                out[written + i] = ((self.pos + i) % 251) as u8;
            }
            self.pos += n;
            written += n;
        }
        if !self.looping && self.pos >= self.total {
            self.status = DecoderStatus::EndOfStream;
        }
        Ok(written)
    }

    fn rewind(&mut self) -> Result<(), DecoderError> {
        self.pos = 0;
        self.status = DecoderStatus::Ready;
        Ok(())
    }

    fn seek(&mut self, pos_ms: u32) -> Result<u32, DecoderError> {
        let mut target = self.format.bytes_for_ms(self.frequency, pos_ms);
        target -= target % self.format.frame_bytes();
        self.pos = target.min(self.total);
        self.status = DecoderStatus::Ready;
        if self.pos == target {
            Ok(pos_ms)
        } else {
            Ok((self.pos * 1000 / self.byte_rate().max(1)) as u32)
        }
    }

    fn time(&self) -> f32 {
        self.pos as f32 / self.byte_rate().max(1) as f32
    }

    fn length(&self) -> f32 {
        self.total as f32 / self.byte_rate().max(1) as f32
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn is_looping(&self) -> bool {
        self.looping
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn status(&self) -> DecoderStatus {
        self.status
    }
}

/// Loader over a name → byte-length table; every open yields a fresh
/// 11025 Hz mono 16-bit [`ScriptedDecoder`] of that many bytes.
pub struct MemoryLoader {
    files: HashMap<String, usize>,
}

impl MemoryLoader {
    pub fn new(files: &[(&str, usize)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(name, bytes)| (name.to_string(), *bytes))
                .collect(),
        }
    }
}

impl SoundLoader for MemoryLoader {
    fn open(&self, name: &str) -> Result<Box<dyn Decoder>, DecoderError> {
        let bytes = self
            .files
            .get(name)
            .copied()
            .ok_or_else(|| DecoderError::NotFound(name.to_string()))?;
        Ok(Box::new(ScriptedDecoder::new(
            bytes,
            11025,
            PcmFormat::MONO_16,
        )))
    }
}

/// A fully mocked engine: mock mixer, manual clock, default config, no
/// task thread (tests drive `process_stream` by hand or spawn one).
pub struct TestRig {
    pub shared: Arc<Shared>,
    pub mixer: Arc<MockMixer>,
    pub clock: Arc<ManualClock>,
    signals: Receiver<TaskSignal>,
}

impl TestRig {
    pub fn new() -> Self {
        let mixer = Arc::new(MockMixer::new());
        let clock = ManualClock::new();
        let (wake_tx, signals) = unbounded();
        let shared = Arc::new(
            Shared::new(
                mixer.clone(),
                clock.clone(),
                &SoundConfig::default(),
                wake_tx,
            )
            .expect("mock mixer cannot fail source creation"),
        );
        Self {
            shared,
            mixer,
            clock,
            signals,
        }
    }

    /// One recycle pass over `slot`, as the task thread would run it.
    pub fn run_task_once(&self, slot: usize) {
        let mut scratch = vec![0u8; self.shared.chunk_bytes];
        let mut st = self.shared.slots[slot].state.lock();
        crate::stream::task::process_stream(&self.shared, slot, &mut st, &mut scratch);
    }

    /// Hand the task-signal receiver to a spawned task thread.
    pub fn signals(&self) -> Receiver<TaskSignal> {
        self.signals.clone()
    }
}

/// A sample over a fresh scripted decoder (11025 Hz mono 16-bit).
pub fn scripted_sample(rig: &TestRig, buffer_count: usize, total_bytes: usize) -> Arc<Sample> {
    let sample = Sample::new(rig.shared.mixer.clone(), buffer_count, Arc::new(NoCallbacks))
        .expect("mock mixer cannot fail buffer creation");
    let decoder = ScriptedDecoder::new(total_bytes, 11025, PcmFormat::MONO_16);
    sample.set_length(decoder.length());
    sample.set_decoder(Some(share(Box::new(decoder))));
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_decoder_is_deterministic() {
        let mut dec = ScriptedDecoder::new(1000, 11025, PcmFormat::MONO_16);
        let mut first = vec![0u8; 1000];
        assert_eq!(dec.decode(&mut first).unwrap(), 1000);
        dec.rewind().unwrap();
        let mut second = vec![0u8; 1000];
        dec.decode(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scripted_decoder_failure_point() {
        let mut dec = ScriptedDecoder::new(100, 11025, PcmFormat::MONO_16).failing_at(50);
        let mut buf = [0u8; 64];
        assert_eq!(dec.decode(&mut buf).unwrap(), 50);
        assert!(dec.decode(&mut buf).is_err());
        assert_eq!(dec.status(), DecoderStatus::Failed);
    }

    #[test]
    fn test_memory_loader_misses() {
        let loader = MemoryLoader::new(&[("a", 10)]);
        assert!(loader.open("a").is_ok());
        assert!(matches!(loader.open("b"), Err(DecoderError::NotFound(_))));
    }
}
