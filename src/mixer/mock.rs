//! Scriptable mixer backend for tests.
//!
//! Sources follow the OpenAL state model but time never passes on its own:
//! tests call [`MockMixer::advance_buffers`] to mark queued buffers played
//! and [`MockMixer::force_state`] to fake device conditions (e.g. a starved
//! source that fell out of Playing). `play` calls are counted per source so
//! underrun-recovery behavior can be asserted.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{BufferId, Mixer, MixerError, SourceId, SourceState};
use crate::decoder::PcmFormat;

#[derive(Default)]
struct MockSource {
    state: SourceState,
    queued: Vec<BufferId>,
    processed: Vec<BufferId>,
    bound: Option<BufferId>,
    gain: f32,
    looping: bool,
    position: [f32; 3],
    play_calls: u32,
}

#[derive(Default)]
struct MockBuffer {
    bytes: usize,
    frequency: u32,
    format: Option<PcmFormat>,
}

#[derive(Default)]
struct MockState {
    next_source: u32,
    next_buffer: u32,
    sources: HashMap<SourceId, MockSource>,
    buffers: HashMap<BufferId, MockBuffer>,
}

/// A mixer whose playback clock is the test itself.
#[derive(Default)]
pub struct MockMixer {
    state: Mutex<MockState>,
}

impl MockMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark up to `count` queued buffers on `source` as played. When the
    /// queue drains completely the source leaves Playing for Stopped, as a
    /// real device would.
    pub fn advance_buffers(&self, source: SourceId, count: usize) {
        let mut st = self.state.lock();
        let Some(src) = st.sources.get_mut(&source) else {
            return;
        };
        let n = count.min(src.queued.len());
        let played: Vec<_> = src.queued.drain(..n).collect();
        src.processed.extend(played);
        if src.queued.is_empty() && src.state == SourceState::Playing {
            src.state = SourceState::Stopped;
        }
    }

    /// Force a source into a state without touching its queue.
    pub fn force_state(&self, source: SourceId, state: SourceState) {
        let mut st = self.state.lock();
        if let Some(src) = st.sources.get_mut(&source) {
            src.state = state;
        }
    }

    /// How many times `play` was called on `source`.
    pub fn play_calls(&self, source: SourceId) -> u32 {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|s| s.play_calls)
            .unwrap_or(0)
    }

    /// Current gain of `source`.
    pub fn gain(&self, source: SourceId) -> f32 {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|s| s.gain)
            .unwrap_or(0.0)
    }

    /// Current 3D position of `source`.
    pub fn position(&self, source: SourceId) -> [f32; 3] {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|s| s.position)
            .unwrap_or_default()
    }

    /// The statically bound buffer of `source`, if any.
    pub fn bound_buffer(&self, source: SourceId) -> Option<BufferId> {
        self.state.lock().sources.get(&source).and_then(|s| s.bound)
    }

    /// Whether `source` is set to loop at the device level.
    pub fn looping(&self, source: SourceId) -> bool {
        self.state
            .lock()
            .sources
            .get(&source)
            .map(|s| s.looping)
            .unwrap_or(false)
    }

    /// Size, frequency and format of the last upload to `buffer`.
    pub fn buffer_info(&self, buffer: BufferId) -> Option<(usize, u32, Option<PcmFormat>)> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|b| (b.bytes, b.frequency, b.format))
    }

    fn with_source<T>(
        &self,
        source: SourceId,
        f: impl FnOnce(&mut MockSource) -> T,
    ) -> Result<T, MixerError> {
        let mut st = self.state.lock();
        st.sources
            .get_mut(&source)
            .map(f)
            .ok_or(MixerError::BadSource(source))
    }
}

impl Mixer for MockMixer {
    fn new_source(&self) -> Result<SourceId, MixerError> {
        let mut st = self.state.lock();
        let id = SourceId(st.next_source);
        st.next_source += 1;
        st.sources.insert(
            id,
            MockSource {
                gain: 1.0,
                ..Default::default()
            },
        );
        Ok(id)
    }

    fn delete_source(&self, source: SourceId) -> Result<(), MixerError> {
        self.state
            .lock()
            .sources
            .remove(&source)
            .map(|_| ())
            .ok_or(MixerError::BadSource(source))
    }

    fn play(&self, source: SourceId) -> Result<(), MixerError> {
        self.with_source(source, |s| {
            s.state = SourceState::Playing;
            s.play_calls += 1;
        })
    }

    fn stop(&self, source: SourceId) -> Result<(), MixerError> {
        self.with_source(source, |s| {
            // Stopping marks the entire queue processed.
            let drained: Vec<_> = s.queued.drain(..).collect();
            s.processed.extend(drained);
            s.state = SourceState::Stopped;
        })
    }

    fn pause(&self, source: SourceId) -> Result<(), MixerError> {
        self.with_source(source, |s| {
            if s.state == SourceState::Playing {
                s.state = SourceState::Paused;
            }
        })
    }

    fn rewind(&self, source: SourceId) -> Result<(), MixerError> {
        self.with_source(source, |s| {
            let drained: Vec<_> = s.queued.drain(..).collect();
            s.processed.extend(drained);
            s.state = SourceState::Initial;
        })
    }

    fn queue_buffers(&self, source: SourceId, buffers: &[BufferId]) -> Result<(), MixerError> {
        {
            let st = self.state.lock();
            for b in buffers {
                if !st.buffers.contains_key(b) {
                    return Err(MixerError::BadBuffer(*b));
                }
            }
        }
        self.with_source(source, |s| s.queued.extend_from_slice(buffers))
    }

    fn unqueue_buffers(
        &self,
        source: SourceId,
        count: usize,
    ) -> Result<Vec<BufferId>, MixerError> {
        self.with_source(source, |s| {
            if s.processed.len() < count {
                return Err(MixerError::BufferBusy);
            }
            Ok(s.processed.drain(..count).collect())
        })?
    }

    fn set_gain(&self, source: SourceId, gain: f32) -> Result<(), MixerError> {
        self.with_source(source, |s| s.gain = gain)
    }

    fn set_looping(&self, source: SourceId, looping: bool) -> Result<(), MixerError> {
        self.with_source(source, |s| s.looping = looping)
    }

    fn set_position(&self, source: SourceId, position: [f32; 3]) -> Result<(), MixerError> {
        self.with_source(source, |s| s.position = position)
    }

    fn set_buffer(&self, source: SourceId, buffer: Option<BufferId>) -> Result<(), MixerError> {
        if let Some(b) = buffer
            && !self.state.lock().buffers.contains_key(&b)
        {
            return Err(MixerError::BadBuffer(b));
        }
        self.with_source(source, |s| s.bound = buffer)
    }

    fn source_state(&self, source: SourceId) -> Result<SourceState, MixerError> {
        self.with_source(source, |s| s.state)
    }

    fn buffers_queued(&self, source: SourceId) -> Result<usize, MixerError> {
        self.with_source(source, |s| s.queued.len() + s.processed.len())
    }

    fn buffers_processed(&self, source: SourceId) -> Result<usize, MixerError> {
        self.with_source(source, |s| s.processed.len())
    }

    fn new_buffer(&self) -> Result<BufferId, MixerError> {
        let mut st = self.state.lock();
        let id = BufferId(st.next_buffer);
        st.next_buffer += 1;
        st.buffers.insert(id, MockBuffer::default());
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) -> Result<(), MixerError> {
        self.state
            .lock()
            .buffers
            .remove(&buffer)
            .map(|_| ())
            .ok_or(MixerError::BadBuffer(buffer))
    }

    fn upload(
        &self,
        buffer: BufferId,
        format: PcmFormat,
        data: &[u8],
        frequency: u32,
    ) -> Result<(), MixerError> {
        let mut st = self.state.lock();
        let buf = st
            .buffers
            .get_mut(&buffer)
            .ok_or(MixerError::BadBuffer(buffer))?;
        buf.bytes = data.len();
        buf.frequency = frequency;
        buf.format = Some(format);
        Ok(())
    }

    fn buffer_size(&self, buffer: BufferId) -> Result<usize, MixerError> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|b| b.bytes)
            .ok_or(MixerError::BadBuffer(buffer))
    }
}
