//! The sound system facade.
//!
//! [`SoundSystem`] owns the source pool, the streaming task thread, the
//! track player and the volume/fade state, and exposes the caller-facing
//! API: music and speech streams, spliced dialogue tracks, one-shot
//! effects, the oscilloscope window and the lifecycle. Construction
//! spawns the task; [`SoundSystem::shutdown`] (also run on drop) signals
//! it and joins.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use crate::config::SoundConfig;
use crate::decoder::{SoundLoader, share};
use crate::error::{Error, Result};
use crate::mixer::SharedMixer;
use crate::sfx::{self, SoundBank, SoundPos};
use crate::stream::scope::AgcState;
use crate::stream::{
    MUSIC_BUFFERS, MUSIC_SOURCE, NUM_SOURCES, NoCallbacks, SPEECH_SOURCE, Sample, Shared, scope,
    task,
};
use crate::track::{ChunkCallback, SubtitleRef, TrackPlayer};
use crate::time::{Clock, MonotonicClock, Ticks};

/// Poll period of [`SoundSystem::wait_for_sound_end`].
pub const SOUND_POLL_MS: u64 = 50;

/// A loaded music (or speech-as-music) resource. The sample owns its
/// decoder for its whole life; dropping the handle after the stream is
/// stopped releases the mixer buffers.
pub struct Music {
    sample: Arc<Sample>,
}

/// The audio runtime.
pub struct SoundSystem {
    shared: Arc<Shared>,
    loader: Arc<dyn SoundLoader>,
    track: TrackPlayer,
    /// Serializes resource loads; `try_lock` makes a concurrent load a
    /// soft error instead of a wait.
    load_guard: Mutex<()>,
    agc: Mutex<AgcState>,
    positional_sfx: bool,
    task: Option<JoinHandle<()>>,
}

impl SoundSystem {
    /// Bring the runtime up against a mixer backend and a resource
    /// loader, and start the streaming task.
    pub fn new(
        mixer: SharedMixer,
        loader: Arc<dyn SoundLoader>,
        config: SoundConfig,
    ) -> Result<Self> {
        Self::with_clock(mixer, loader, config, MonotonicClock::new())
    }

    /// Like [`Self::new`] with an injected clock (tests use a manual one).
    pub fn with_clock(
        mixer: SharedMixer,
        loader: Arc<dyn SoundLoader>,
        config: SoundConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let (wake_tx, wake_rx) = unbounded();
        let shared = Arc::new(Shared::new(mixer, clock, &config, wake_tx)?);
        // Push the configured volumes down to the backend sources.
        shared.set_music_volume(shared.music_volume());
        shared.set_speech_volume(shared.speech_volume());

        let task = task::spawn(shared.clone(), wake_rx)?;
        tracing::info!(
            music_volume = shared.music_volume(),
            sfx_volume = shared.sfx_volume(),
            "sound system up"
        );
        Ok(Self {
            shared: shared.clone(),
            loader: loader.clone(),
            track: TrackPlayer::new(shared, loader),
            load_guard: Mutex::new(()),
            agc: Mutex::new(AgcState::default()),
            positional_sfx: config.sfx.positional,
            task: Some(task),
        })
    }

    // ---- Music ----

    /// Load a music resource by name. Only one load may be in flight;
    /// a reentrant or concurrent call gets [`Error::ConcurrentLoad`].
    pub fn load_music(&self, name: &str) -> Result<Music> {
        let Some(_guard) = self.load_guard.try_lock() else {
            return Err(Error::ConcurrentLoad);
        };
        let decoder = self.loader.open(name)?;
        let sample = Sample::new(self.shared.mixer.clone(), MUSIC_BUFFERS, Arc::new(NoCallbacks))?;
        sample.set_length(decoder.length());
        sample.set_decoder(Some(share(decoder)));
        tracing::debug!(target: "stream::control", name, "music loaded");
        Ok(Music { sample })
    }

    /// Start `music` on the music slot, from the top.
    pub fn play_music(&self, music: &Music, looping: bool, scope: bool) -> Result<()> {
        self.shared.set_music_volume(self.shared.music_volume());
        let mut st = self.shared.slots[MUSIC_SOURCE].state.lock();
        self.shared
            .play_stream_locked(MUSIC_SOURCE, &mut st, music.sample.clone(), looping, scope, true)
    }

    pub fn stop_music(&self) {
        let mut st = self.shared.slots[MUSIC_SOURCE].state.lock();
        self.shared.stop_stream_locked(MUSIC_SOURCE, &mut st);
    }

    pub fn pause_music(&self) {
        let mut st = self.shared.slots[MUSIC_SOURCE].state.lock();
        self.shared.pause_stream_locked(MUSIC_SOURCE, &mut st);
    }

    pub fn resume_music(&self) {
        let mut st = self.shared.slots[MUSIC_SOURCE].state.lock();
        self.shared.resume_stream_locked(MUSIC_SOURCE, &mut st);
    }

    pub fn seek_music(&self, pos_ms: u32) -> Result<()> {
        let mut st = self.shared.slots[MUSIC_SOURCE].state.lock();
        self.shared.seek_stream_locked(MUSIC_SOURCE, &mut st, pos_ms)
    }

    /// Whether the music slot is streaming. `None` asks about any music;
    /// `Some` asks about one handle in particular.
    pub fn music_playing(&self, which: Option<&Music>) -> bool {
        let st = self.shared.slots[MUSIC_SOURCE].state.lock();
        if !st.stream_should_be_playing {
            return false;
        }
        match which {
            None => true,
            Some(music) => st
                .sample
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(s, &music.sample)),
        }
    }

    // ---- Speech played as a plain stream ----

    pub fn play_speech(&self, speech: &Music, scope: bool) -> Result<()> {
        self.shared.set_speech_volume(self.shared.speech_volume());
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        self.shared
            .play_stream_locked(SPEECH_SOURCE, &mut st, speech.sample.clone(), false, scope, true)
    }

    pub fn stop_speech(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        self.shared.stop_stream_locked(SPEECH_SOURCE, &mut st);
    }

    pub fn speech_playing(&self) -> bool {
        let st = self.shared.slots[SPEECH_SOURCE].state.lock();
        st.stream_should_be_playing
    }

    // ---- Volumes & fades ----

    pub fn music_volume(&self) -> u32 {
        self.shared.music_volume()
    }

    pub fn set_music_volume(&self, volume: u32) {
        self.shared.set_music_volume(volume);
    }

    pub fn set_speech_volume(&self, volume: u32) {
        self.shared.set_speech_volume(volume);
    }

    pub fn set_sfx_volume(&self, volume: u32) {
        self.shared
            .sfx_volume
            .store(volume.min(crate::stream::MAX_VOLUME), std::sync::atomic::Ordering::Release);
    }

    pub fn set_channel_volume(&self, channel: usize, volume: u32) {
        sfx::set_channel_volume(&self.shared, channel, volume);
    }

    /// Ramp the music volume to `end_volume` over `interval` ticks. A
    /// zero (or negative) interval applies the volume immediately.
    pub fn fade_music(&self, interval: Ticks, end_volume: u32) {
        let now = self.shared.clock.now();
        if self
            .shared
            .fade
            .begin(now, interval, end_volume, self.shared.music_volume())
        {
            self.shared.wake_task();
        } else {
            self.shared.set_music_volume(end_volume);
        }
    }

    // ---- Track player ----

    /// Splice a new dialogue track (`name` given) or append subtitle
    /// pages to the current one (`name` absent). See the track module for
    /// pagination and timestamp semantics.
    pub fn splice_track(
        &self,
        name: Option<&str>,
        subtitle: Option<&str>,
        timestamps: Option<&str>,
        callback: Option<ChunkCallback>,
    ) -> Result<()> {
        self.track.splice(name, subtitle, timestamps, callback)
    }

    /// Append up to twenty fully pre-decoded segments to the current
    /// track as one continuous subtitle.
    pub fn splice_multi_track(&self, names: &[&str], subtitle: Option<&str>) -> Result<()> {
        self.track.splice_multi(names, subtitle)
    }

    pub fn play_track(&self) -> Result<()> {
        self.track.play()
    }

    pub fn stop_track(&self) {
        self.track.stop()
    }

    pub fn pause_track(&self) {
        self.track.pause()
    }

    pub fn resume_track(&self) {
        self.track.resume()
    }

    pub fn playing_track(&self) -> bool {
        self.track.playing()
    }

    /// Seek to an absolute track offset in ticks.
    pub fn jump_track(&self, offset: Ticks) {
        self.track.jump(offset)
    }

    pub fn fast_forward_smooth(&self) {
        self.track.fast_forward_smooth()
    }

    pub fn fast_reverse_smooth(&self) {
        self.track.fast_reverse_smooth()
    }

    pub fn fast_forward_page(&self) {
        self.track.fast_forward_page()
    }

    pub fn fast_reverse_page(&self) {
        self.track.fast_reverse_page()
    }

    /// Track position scaled to `units` (0 when no track is armed).
    pub fn track_position(&self, units: i64) -> i64 {
        self.track.position(units)
    }

    /// Subtitle currently on screen.
    pub fn track_subtitle(&self) -> Option<String> {
        self.track.subtitle()
    }

    pub fn first_subtitle(&self) -> Option<SubtitleRef> {
        self.track.first_subtitle()
    }

    pub fn next_subtitle(&self, current: SubtitleRef) -> Option<SubtitleRef> {
        self.track.next_subtitle(current)
    }

    pub fn subtitle_text(&self, page: SubtitleRef) -> Option<String> {
        self.track.subtitle_text(page)
    }

    // ---- Sound effects ----

    /// Load a bank of pre-decoded effects.
    pub fn load_sound_bank(&self, names: &[&str]) -> Result<SoundBank> {
        let Some(_guard) = self.load_guard.try_lock() else {
            return Err(Error::ConcurrentLoad);
        };
        SoundBank::load(&self.shared.mixer, self.loader.as_ref(), names)
    }

    /// Stop anything still playing out of `bank` and release it.
    pub fn release_sound_bank(&self, bank: SoundBank) {
        sfx::release_bank(&self.shared, bank);
    }

    /// Fire effect `index` from `bank` on `channel`. `object` tags the
    /// channel for later position updates; `priority` is advisory.
    pub fn play_channel(
        &self,
        channel: usize,
        bank: &SoundBank,
        index: usize,
        pos: SoundPos,
        object: Option<u64>,
        priority: u32,
    ) -> Result<()> {
        tracing::trace!(target: "sfx", channel, index, priority, "play effect");
        sfx::play_channel(
            &self.shared,
            self.positional_sfx,
            channel,
            bank,
            index,
            pos,
            object,
        )
    }

    pub fn stop_channel(&self, channel: usize) -> Result<()> {
        sfx::stop_channel(&self.shared, channel)
    }

    pub fn channel_playing(&self, channel: usize) -> bool {
        sfx::channel_playing(&self.shared, channel)
    }

    /// Update the world position of the effect on `channel`.
    pub fn update_sound_position(&self, channel: usize, pos: SoundPos) {
        sfx::update_position(&self.shared, self.positional_sfx, channel, pos);
    }

    // ---- Oscilloscope ----

    /// A `width`-column amplitude window of what is playing right now,
    /// as rows in `[0, height)`. Prefers the speech slot when it has a
    /// live decoder and `want_speech` is set, else reads the music slot.
    pub fn scope_window(&self, want_speech: bool, width: usize, height: u16) -> Option<Vec<u16>> {
        let now = self.shared.clock.now();
        let mut agc = self.agc.lock();
        if want_speech {
            let st = self.shared.slots[SPEECH_SOURCE].state.lock();
            let live = st.sample.as_ref().is_some_and(|s| s.decoder().is_some());
            if live {
                return scope::read_window(&st, true, now, width, height, &mut agc);
            }
        }
        let st = self.shared.slots[MUSIC_SOURCE].state.lock();
        scope::read_window(&st, false, now, width, height, &mut agc)
    }

    // ---- Lifecycle ----

    /// Flag observed by [`Self::wait_for_sound_end`] so poll loops bail
    /// out during game shutdown.
    pub fn request_quit(&self) {
        self.shared
            .quit
            .store(true, std::sync::atomic::Ordering::Release);
    }

    /// Block until the effect on `channel` (or all effect channels, with
    /// `None`) stops playing. Returns early once quit is requested.
    pub fn wait_for_sound_end(&self, channel: Option<usize>) {
        loop {
            if self.shared.quit.load(std::sync::atomic::Ordering::Acquire) {
                return;
            }
            let busy = match channel {
                Some(ch) => self.channel_playing(ch),
                None => (0..crate::stream::NUM_SFX_CHANNELS).any(|ch| self.channel_playing(ch)),
            };
            if !busy {
                return;
            }
            std::thread::sleep(Duration::from_millis(SOUND_POLL_MS));
        }
    }

    /// Stop everything, join the task thread and release the sources.
    /// Safe to call more than once; also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.task.take() {
            self.shared.signal_shutdown();
            if handle.join().is_err() {
                tracing::error!("streaming task did not exit cleanly");
            }

            self.track.stop();
            for slot in 0..NUM_SOURCES {
                let mut st = self.shared.slots[slot].state.lock();
                self.shared.stop_stream_locked(slot, &mut st);
            }
            for slot in &self.shared.slots {
                if let Err(e) = self.shared.mixer.delete_source(slot.source) {
                    tracing::warn!(error = %e, "source delete failed");
                }
            }
            tracing::info!("sound system down");
        }
    }
}

impl Drop for SoundSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
