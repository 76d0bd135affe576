//! Source pool, samples and stream control.
//!
//! The runtime owns a fixed array of mixer sources: `NUM_SFX_CHANNELS`
//! one-shot effect channels followed by one music slot and one speech
//! slot. The two streaming slots are fed by the background task in
//! [`task`]; the effect channels never are. That partition is by index
//! and the locking rules depend on it.
//!
//! Every slot has its own mutex. Stream control primitives are invoked by
//! the caller thread with the target slot's lock held (the `*_locked`
//! methods make that explicit); the task locks one slot at a time. Nothing
//! ever takes two slot locks at once, so the lock graph stays a star.

pub(crate) mod fade;
pub mod scope;
pub(crate) mod task;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::config::SoundConfig;
use crate::decoder::SharedDecoder;
use crate::error::{Error, Result};
use crate::mixer::{BufferId, MixerError, SharedMixer, SourceId};
use crate::time::{Clock, Ticks, ticks_from_secs_f32};

use self::fade::FadeControl;
use self::scope::{SCOPE_PAD_BYTES, ScopeRing};
use self::task::TaskSignal;

/// Number of one-shot sound-effect channels.
pub const NUM_SFX_CHANNELS: usize = 5;
/// Total mixer sources: effect channels plus music plus speech.
pub const NUM_SOURCES: usize = NUM_SFX_CHANNELS + 2;
/// Slot index of the music stream.
pub const MUSIC_SOURCE: usize = NUM_SFX_CHANNELS;
/// Slot index of the speech stream.
pub const SPEECH_SOURCE: usize = NUM_SFX_CHANNELS + 1;

/// Mixer buffers per music sample.
pub const MUSIC_BUFFERS: usize = 64;
/// Mixer buffers per speech sample.
pub const SPEECH_BUFFERS: usize = 8;
/// Mixer buffers per sound-effect sample.
pub const SFX_BUFFERS: usize = 1;

/// Highest volume value.
pub const MAX_VOLUME: u32 = 255;
/// Default music volume.
pub const NORMAL_VOLUME: u32 = 160;

/// Opaque payload ferried by a buffer tag from the thread that noticed a
/// chunk boundary to the thread that hears the buffer finish.
pub type TagPayload = Arc<dyn Any + Send + Sync>;

/// Optional per-sample stream callbacks.
///
/// All five fire with the owning slot's mutex held, on whichever thread
/// drove the transition (control primitives on the caller thread, the
/// recycle loop on the task thread). Implementations may read state
/// guarded by that same slot lock but must not re-enter stream control.
pub trait StreamCallbacks: Send + Sync {
    /// The stream is about to start. Returning false aborts the start.
    fn on_start_stream(&self, sample: &Sample) -> bool {
        let _ = sample;
        true
    }

    /// The sample's decoder ran out of audio while `buffer` was being
    /// recycled. Return true after installing a fresh decoder on the
    /// sample to keep streaming, false to let the stream end.
    fn on_end_chunk(&self, sample: &Sample, buffer: BufferId) -> bool {
        let _ = (sample, buffer);
        false
    }

    /// The stream ran dry and stopped.
    fn on_end_stream(&self, sample: &Sample) {
        let _ = sample;
    }

    /// A tagged buffer finished playing.
    fn on_tagged_buffer(&self, sample: &Sample, payload: TagPayload) {
        let _ = (sample, payload);
    }

    /// A refilled buffer was queued on the source.
    fn on_queue_buffer(&self, sample: &Sample, buffer: BufferId) {
        let _ = (sample, buffer);
    }
}

/// The empty callback set.
pub struct NoCallbacks;

impl StreamCallbacks for NoCallbacks {}

/// A playable binding of a decoder to a pool of mixer buffers.
///
/// The sample owns its buffers and its tag table. Whether it owns its
/// decoder depends on the caller: music binds a decoder for the sample's
/// whole life, while the track player lends each chunk's decoder to the
/// speech sample only while that chunk is active. Mutable state is only
/// touched while the slot the sample is bound to is locked; the small
/// internal locks exist to make that sharing expressible, not as an extra
/// synchronization layer.
pub struct Sample {
    mixer: SharedMixer,
    buffers: Vec<BufferId>,
    tags: Mutex<Vec<Option<TagPayload>>>,
    decoder: Mutex<Option<SharedDecoder>>,
    /// Initial stream offset in ticks.
    offset: AtomicI64,
    /// Total length in seconds (f32 bits).
    length_bits: AtomicU32,
    looping: AtomicBool,
    callbacks: Arc<dyn StreamCallbacks>,
}

impl Sample {
    /// Create a sample with `buffer_count` fresh mixer buffers.
    pub fn new(
        mixer: SharedMixer,
        buffer_count: usize,
        callbacks: Arc<dyn StreamCallbacks>,
    ) -> std::result::Result<Arc<Self>, MixerError> {
        let mut buffers = Vec::with_capacity(buffer_count);
        for _ in 0..buffer_count {
            match mixer.new_buffer() {
                Ok(b) => buffers.push(b),
                Err(e) => {
                    for b in buffers {
                        let _ = mixer.delete_buffer(b);
                    }
                    return Err(e);
                }
            }
        }
        let tags = Mutex::new(vec![None; buffer_count]);
        Ok(Arc::new(Self {
            mixer,
            buffers,
            tags,
            decoder: Mutex::new(None),
            offset: AtomicI64::new(0),
            length_bits: AtomicU32::new(0.0_f32.to_bits()),
            looping: AtomicBool::new(false),
            callbacks,
        }))
    }

    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    pub fn decoder(&self) -> Option<SharedDecoder> {
        self.decoder.lock().clone()
    }

    pub fn set_decoder(&self, decoder: Option<SharedDecoder>) {
        *self.decoder.lock() = decoder;
    }

    /// Initial stream offset in ticks.
    pub fn offset(&self) -> Ticks {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, offset: Ticks) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    /// Total length in seconds.
    pub fn length(&self) -> f32 {
        f32::from_bits(self.length_bits.load(Ordering::Relaxed))
    }

    pub fn set_length(&self, seconds: f32) {
        self.length_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    pub(crate) fn callbacks(&self) -> Arc<dyn StreamCallbacks> {
        self.callbacks.clone()
    }

    fn buffer_index(&self, buffer: BufferId) -> Option<usize> {
        self.buffers.iter().position(|&b| b == buffer)
    }

    /// Attach a deferred event to `buffer`, fired when it finishes
    /// playing. At most one tag per buffer; a second tag replaces the
    /// first with a warning.
    pub fn set_tag(&self, buffer: BufferId, payload: TagPayload) {
        let Some(index) = self.buffer_index(buffer) else {
            tracing::warn!(target: "stream::control", ?buffer, "tag on foreign buffer ignored");
            return;
        };
        let mut tags = self.tags.lock();
        if tags[index].is_some() {
            tracing::warn!(target: "stream::control", ?buffer, "replacing existing buffer tag");
        }
        tags[index] = Some(payload);
    }

    /// Consume the tag attached to `buffer`, if any.
    pub fn take_tag(&self, buffer: BufferId) -> Option<TagPayload> {
        let index = self.buffer_index(buffer)?;
        self.tags.lock()[index].take()
    }

    pub fn clear_tags(&self) {
        for tag in self.tags.lock().iter_mut() {
            *tag = None;
        }
    }
}

impl Drop for Sample {
    fn drop(&mut self) {
        for &buffer in &self.buffers {
            if let Err(e) = self.mixer.delete_buffer(buffer) {
                tracing::warn!(target: "stream::control", ?buffer, error = %e, "buffer delete failed");
            }
        }
    }
}

/// Mutable per-slot state, guarded by the slot mutex.
pub(crate) struct SlotState {
    pub sample: Option<Arc<Sample>>,
    pub stream_should_be_playing: bool,
    /// End of stream has been reported for the current sample. A stream
    /// whose playing flag dropped early (decode failure) keeps getting
    /// task passes until this is set, so the end callback always fires.
    pub stream_ended: bool,
    /// Wall-clock anchor for the playback position: position = now −
    /// start_time. Adjusted on resume rather than seeking the decoder, so
    /// it is not a decode position.
    pub start_time: Ticks,
    /// 0 = not paused.
    pub pause_time: Ticks,
    pub last_queued_buf: Option<BufferId>,
    /// Game-object tag for positional effects.
    pub positional_object: Option<u64>,
    /// Per-channel gain for effect slots.
    pub channel_volume: u32,
    pub scope: Option<ScopeRing>,
}

impl SlotState {
    fn new() -> Self {
        Self {
            sample: None,
            stream_should_be_playing: false,
            stream_ended: false,
            start_time: 0,
            pause_time: 0,
            last_queued_buf: None,
            positional_object: None,
            channel_volume: MAX_VOLUME,
            scope: None,
        }
    }
}

/// One mixer source plus its local state.
pub(crate) struct Slot {
    pub source: SourceId,
    pub state: Mutex<SlotState>,
}

/// Engine state shared between the caller thread and the streaming task.
pub(crate) struct Shared {
    pub mixer: SharedMixer,
    pub clock: Arc<dyn Clock>,
    pub slots: Vec<Slot>,
    pub fade: FadeControl,
    pub music_volume: AtomicU32,
    pub speech_volume: AtomicU32,
    pub sfx_volume: AtomicU32,
    /// Bytes decoded per mixer buffer.
    pub chunk_bytes: usize,
    pub shutdown: AtomicBool,
    pub quit: AtomicBool,
    wake: Sender<TaskSignal>,
}

impl Shared {
    pub fn new(
        mixer: SharedMixer,
        clock: Arc<dyn Clock>,
        config: &SoundConfig,
        wake: Sender<TaskSignal>,
    ) -> std::result::Result<Self, MixerError> {
        let mut slots = Vec::with_capacity(NUM_SOURCES);
        for _ in 0..NUM_SOURCES {
            slots.push(Slot {
                source: mixer.new_source()?,
                state: Mutex::new(SlotState::new()),
            });
        }
        Ok(Self {
            mixer,
            clock,
            slots,
            fade: FadeControl::new(),
            music_volume: AtomicU32::new(config.volume.music.min(MAX_VOLUME)),
            speech_volume: AtomicU32::new(config.volume.speech.min(MAX_VOLUME)),
            sfx_volume: AtomicU32::new(config.volume.sfx.min(MAX_VOLUME)),
            chunk_bytes: config.stream.chunk_bytes,
            shutdown: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            wake,
        })
    }

    /// Nudge the task out of its idle sleep.
    pub fn wake_task(&self) {
        let _ = self.wake.send(TaskSignal::Wake);
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake.send(TaskSignal::Shutdown);
    }

    fn gain(volume: u32) -> f32 {
        volume.min(MAX_VOLUME) as f32 / MAX_VOLUME as f32
    }

    pub fn music_volume(&self) -> u32 {
        self.music_volume.load(Ordering::Acquire)
    }

    /// Set the music volume and apply it to the music source. Safe from
    /// both the caller thread and the fade interpolator: the stored value
    /// is atomic and the mixer synchronizes itself.
    pub fn set_music_volume(&self, volume: u32) {
        let volume = volume.min(MAX_VOLUME);
        self.music_volume.store(volume, Ordering::Release);
        let source = self.slots[MUSIC_SOURCE].source;
        if let Err(e) = self.mixer.set_gain(source, Self::gain(volume)) {
            tracing::warn!(target: "stream::control", error = %e, "music gain set failed");
        }
    }

    pub fn speech_volume(&self) -> u32 {
        self.speech_volume.load(Ordering::Acquire)
    }

    pub fn set_speech_volume(&self, volume: u32) {
        let volume = volume.min(MAX_VOLUME);
        self.speech_volume.store(volume, Ordering::Release);
        let source = self.slots[SPEECH_SOURCE].source;
        if let Err(e) = self.mixer.set_gain(source, Self::gain(volume)) {
            tracing::warn!(target: "stream::control", error = %e, "speech gain set failed");
        }
    }

    pub fn sfx_volume(&self) -> u32 {
        self.sfx_volume.load(Ordering::Acquire)
    }

    /// Gain for an effect channel, combining its own volume with the
    /// global effect volume.
    pub fn channel_gain(&self, channel_volume: u32) -> f32 {
        Self::gain(channel_volume) * Self::gain(self.sfx_volume())
    }

    // ---- Stream control primitives ----
    //
    // All `*_locked` methods require the caller to hold `slot`'s mutex and
    // pass its guarded state in. Callbacks fire under that lock.

    /// Start streaming `sample` on `slot`. Replaces whatever the slot was
    /// doing. `rewind` restarts the decoder from the top; otherwise the
    /// decoder's current position becomes the stream position.
    pub fn play_stream_locked(
        &self,
        slot: usize,
        st: &mut SlotState,
        sample: Arc<Sample>,
        looping: bool,
        scope: bool,
        rewind: bool,
    ) -> Result<()> {
        self.stop_stream_locked(slot, st);

        let callbacks = sample.callbacks();
        if !callbacks.on_start_stream(&sample) {
            tracing::debug!(target: "stream::control", slot, "stream start refused by callback");
            return Ok(());
        }
        sample.clear_tags();

        let Some(decoder) = sample.decoder() else {
            return Err(Error::invalid("no decoder bound to sample"));
        };

        let offset_initial = if rewind {
            if let Err(e) = decoder.lock().rewind() {
                tracing::warn!(target: "stream::control", slot, error = %e, "decoder rewind failed");
            }
            sample.offset()
        } else {
            sample.offset() + ticks_from_secs_f32(decoder.lock().time())
        };

        st.sample = Some(sample.clone());
        sample.set_looping(looping);
        decoder.lock().set_looping(looping);
        // Looping is the decoder's job; the mixer source always runs the
        // queue once.
        let source = self.slots[slot].source;
        if let Err(e) = self.mixer.set_looping(source, false) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source looping clear failed");
        }

        if scope {
            let capacity = sample.buffers().len() * self.chunk_bytes + SCOPE_PAD_BYTES;
            st.scope = Some(ScopeRing::new(capacity));
        }

        // Pre-fill the whole buffer pool before starting the source.
        let mut scratch = vec![0u8; self.chunk_bytes];
        let mut active_decoder = decoder;
        for &buffer in sample.buffers() {
            if active_decoder.lock().status() == crate::decoder::DecoderStatus::EndOfStream {
                if !callbacks.on_end_chunk(&sample, buffer) {
                    break;
                }
                match sample.decoder() {
                    Some(d) => active_decoder = d,
                    None => break,
                }
            }
            let n = match active_decoder.lock().decode(&mut scratch) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(target: "stream::control", slot, error = %e, "pre-fill decode failed");
                    break;
                }
            };
            if n == 0 {
                break;
            }
            let (format, frequency) = {
                let d = active_decoder.lock();
                (d.format(), d.frequency())
            };
            if let Err(e) = self.mixer.upload(buffer, format, &scratch[..n], frequency) {
                tracing::warn!(target: "stream::control", slot, error = %e, "pre-fill upload failed");
                break;
            }
            if let Err(e) = self.mixer.queue_buffers(source, &[buffer]) {
                tracing::warn!(target: "stream::control", slot, error = %e, "pre-fill queue failed");
                break;
            }
            st.last_queued_buf = Some(buffer);
            callbacks.on_queue_buffer(&sample, buffer);
            if let Some(ring) = &mut st.scope {
                ring.push(&scratch[..n]);
            }
        }

        let now = self.clock.now();
        if let Some(ring) = &mut st.scope {
            ring.last_queue_time = now;
        }
        st.start_time = now - offset_initial;
        st.pause_time = 0;
        st.stream_should_be_playing = true;
        if let Err(e) = self.mixer.play(source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source play failed");
        }
        self.wake_task();
        Ok(())
    }

    /// Stop the stream and reset the slot. Idempotent; `start_time` is the
    /// only field left behind.
    pub fn stop_stream_locked(&self, slot: usize, st: &mut SlotState) {
        self.stop_source_locked(slot, st);
        st.stream_should_be_playing = false;
        st.stream_ended = false;
        st.sample = None;
        st.scope = None;
        st.pause_time = 0;
        st.last_queued_buf = None;
    }

    pub fn pause_stream_locked(&self, slot: usize, st: &mut SlotState) {
        st.stream_should_be_playing = false;
        if st.pause_time == 0 {
            st.pause_time = self.clock.now();
        }
        if let Err(e) = self.mixer.pause(self.slots[slot].source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source pause failed");
        }
    }

    /// Resume after a pause, shifting `start_time` by the paused span so
    /// the playback position picks up where it left off.
    pub fn resume_stream_locked(&self, slot: usize, st: &mut SlotState) {
        if st.pause_time != 0 {
            st.start_time += self.clock.now() - st.pause_time;
        }
        st.pause_time = 0;
        st.stream_should_be_playing = true;
        if let Err(e) = self.mixer.play(self.slots[slot].source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source resume failed");
        }
        self.wake_task();
    }

    /// Reposition the stream: stop the source, seek the decoder, restart
    /// without rewinding.
    pub fn seek_stream_locked(&self, slot: usize, st: &mut SlotState, pos_ms: u32) -> Result<()> {
        if let Err(e) = self.mixer.stop(self.slots[slot].source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source stop failed");
        }
        let Some(sample) = st.sample.clone() else {
            return Err(Error::invalid("no stream to seek"));
        };
        let Some(decoder) = sample.decoder() else {
            return Err(Error::invalid("no decoder bound to sample"));
        };
        decoder.lock().seek(pos_ms).map_err(Error::Decoder)?;
        let looping = sample.is_looping();
        let scope = st.scope.is_some();
        self.play_stream_locked(slot, st, sample, looping, scope, false)
    }

    pub fn playing_stream_locked(&self, st: &SlotState) -> bool {
        st.stream_should_be_playing
    }

    /// Backend stop plus [`Self::clean_source_locked`].
    pub fn stop_source_locked(&self, slot: usize, st: &mut SlotState) {
        if let Err(e) = self.mixer.stop(self.slots[slot].source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source stop failed");
        }
        self.clean_source_locked(slot, st);
    }

    /// Return the source to Initial with an empty queue: drop positional
    /// state, unqueue everything played, detach any static buffer, rewind.
    pub fn clean_source_locked(&self, slot: usize, st: &mut SlotState) {
        let source = self.slots[slot].source;
        st.positional_object = None;
        match self.mixer.buffers_processed(source) {
            Ok(n) if n > 0 => {
                if let Err(e) = self.mixer.unqueue_buffers(source, n) {
                    tracing::warn!(target: "stream::control", slot, error = %e, "unqueue failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(target: "stream::control", slot, error = %e, "processed query failed");
            }
        }
        if let Err(e) = self.mixer.set_buffer(source, None) {
            tracing::warn!(target: "stream::control", slot, error = %e, "buffer detach failed");
        }
        if let Err(e) = self.mixer.rewind(source) {
            tracing::warn!(target: "stream::control", slot, error = %e, "source rewind failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecoderStatus, PcmFormat, share};
    use crate::mixer::{Mixer, SourceState};
    use crate::test_utils::{TestRig, scripted_sample};

    #[test]
    fn test_play_stream_prefills_and_starts() {
        let rig = TestRig::new();
        // Four chunks of audio for a 64-buffer music sample.
        let sample = scripted_sample(&rig, MUSIC_BUFFERS, rig.shared.chunk_bytes * 4);
        let source = rig.shared.slots[MUSIC_SOURCE].source;

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample.clone(), false, false, true)
            .unwrap();

        assert!(st.stream_should_be_playing);
        assert_eq!(st.pause_time, 0);
        assert_eq!(rig.mixer.buffers_queued(source).unwrap(), 4);
        assert_eq!(rig.mixer.source_state(source).unwrap(), SourceState::Playing);
        // Decoder drained to its end during pre-fill.
        let dec = sample.decoder().unwrap();
        assert_eq!(dec.lock().status(), DecoderStatus::EndOfStream);
    }

    #[test]
    fn test_play_stream_scope_ring_sized_for_queue() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, SPEECH_BUFFERS, rig.shared.chunk_bytes * 2);

        let mut st = rig.shared.slots[SPEECH_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(SPEECH_SOURCE, &mut st, sample, false, true, true)
            .unwrap();

        let ring = st.scope.as_ref().unwrap();
        assert_eq!(ring.len(), rig.shared.chunk_bytes * 2);
    }

    #[test]
    fn test_looping_lives_in_the_decoder_not_the_source() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, MUSIC_BUFFERS, rig.shared.chunk_bytes * 2);
        let source = rig.shared.slots[MUSIC_SOURCE].source;

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample.clone(), true, false, true)
            .unwrap();

        assert!(sample.is_looping());
        assert!(sample.decoder().unwrap().lock().is_looping());
        // The backend source never loops; the decoder rewinds instead.
        assert!(!rig.mixer.looping(source));
    }

    #[test]
    fn test_stop_stream_zeroes_slot() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, MUSIC_BUFFERS, rig.shared.chunk_bytes * 2);
        let source = rig.shared.slots[MUSIC_SOURCE].source;

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample, false, true, true)
            .unwrap();
        let start_time = st.start_time;

        rig.shared.stop_stream_locked(MUSIC_SOURCE, &mut st);
        assert!(!st.stream_should_be_playing);
        assert!(!st.stream_ended);
        assert!(st.sample.is_none());
        assert!(st.scope.is_none());
        assert_eq!(st.pause_time, 0);
        assert!(st.last_queued_buf.is_none());
        // start_time survives a stop.
        assert_eq!(st.start_time, start_time);
        assert_eq!(rig.mixer.buffers_queued(source).unwrap(), 0);
        assert_eq!(rig.mixer.source_state(source).unwrap(), SourceState::Initial);

        // Stopping again is a no-op with the same post-state.
        rig.shared.stop_stream_locked(MUSIC_SOURCE, &mut st);
        assert!(st.sample.is_none());
        assert_eq!(st.start_time, start_time);
    }

    #[test]
    fn test_pause_resume_restores_position_anchor() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, MUSIC_BUFFERS, rig.shared.chunk_bytes * 8);

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample, false, false, true)
            .unwrap();
        let start_time = st.start_time;

        rig.clock.advance(1000);
        rig.shared.pause_stream_locked(MUSIC_SOURCE, &mut st);
        assert!(!rig.shared.playing_stream_locked(&st));
        let pause_at = st.pause_time;
        assert_ne!(pause_at, 0);

        // Pausing again does not move the pause stamp.
        rig.clock.advance(500);
        rig.shared.pause_stream_locked(MUSIC_SOURCE, &mut st);
        assert_eq!(st.pause_time, pause_at);

        rig.clock.advance(1500);
        let resume_at = rig.clock.now();
        rig.shared.resume_stream_locked(MUSIC_SOURCE, &mut st);
        assert!(rig.shared.playing_stream_locked(&st));
        assert_eq!(st.pause_time, 0);
        assert_eq!(st.start_time - start_time, resume_at - pause_at);
    }

    #[test]
    fn test_play_stream_abort_by_callback() {
        struct Refuse;
        impl StreamCallbacks for Refuse {
            fn on_start_stream(&self, _sample: &Sample) -> bool {
                false
            }
        }

        let rig = TestRig::new();
        let sample = Sample::new(rig.mixer.clone(), MUSIC_BUFFERS, Arc::new(Refuse)).unwrap();
        sample.set_decoder(Some(share(Box::new(
            crate::test_utils::ScriptedDecoder::new(4096, 11025, PcmFormat::MONO_16),
        ))));

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample, false, false, true)
            .unwrap();
        assert!(!st.stream_should_be_playing);
        assert!(st.sample.is_none());
    }

    #[test]
    fn test_seek_stream_repositions_decoder() {
        let rig = TestRig::new();
        // 2 seconds of 11025 Hz mono 16-bit audio.
        let sample = scripted_sample(&rig, MUSIC_BUFFERS, 2 * 22050);

        let mut st = rig.shared.slots[MUSIC_SOURCE].state.lock();
        rig.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, sample.clone(), false, false, true)
            .unwrap();
        rig.shared
            .seek_stream_locked(MUSIC_SOURCE, &mut st, 1000)
            .unwrap();

        assert!(st.stream_should_be_playing);
        // One second in: start_time is anchored one second before now.
        let position = rig.clock.now() - st.start_time;
        assert!((position - crate::time::TIME_UNITS_PER_SECOND).abs() <= 1);
    }

    #[test]
    fn test_tag_set_take() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, SPEECH_BUFFERS, 4096);
        let buffer = sample.buffers()[3];

        sample.set_tag(buffer, Arc::new(42u32));
        let tag = sample.take_tag(buffer).unwrap();
        let value = tag.downcast::<u32>().ok().unwrap();
        assert_eq!(*value, 42);
        assert!(sample.take_tag(buffer).is_none());
    }

    #[test]
    fn test_clear_tags() {
        let rig = TestRig::new();
        let sample = scripted_sample(&rig, SPEECH_BUFFERS, 4096);
        for &b in sample.buffers() {
            sample.set_tag(b, Arc::new(0u32));
        }
        sample.clear_tags();
        assert!(sample.buffers().iter().all(|&b| sample.take_tag(b).is_none()));
    }
}
