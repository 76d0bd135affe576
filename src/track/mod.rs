//! The track player.
//!
//! A track is a dialogue unit: one or more audio chunks played back to
//! back on the speech slot, each chunk carrying a subtitle page and an
//! optional per-page callback. Chunks are created by splicing: a named
//! splice opens one windowed decoder per subtitle page of a file, a
//! continuation splice appends more pages from the same file, and a
//! multi-track splice appends fully pre-decoded segments.
//!
//! Subtitle synchronization rides the buffer-tag mechanism: when the
//! stream crosses into a tagged chunk, the buffer being refilled is
//! tagged with that chunk, and the subtitle flips when that buffer
//! finishes playing on the device.

mod text;

pub use text::{MIN_PAGE_MS, TEXT_CHAR_MS};

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::decoder::{ClipDecoder, Decoder, MemoryDecoder, SharedDecoder, SoundLoader, share};
use crate::error::{Error, Result};
use crate::mixer::BufferId;
use crate::stream::{SPEECH_BUFFERS, SPEECH_SOURCE, Sample, Shared, SlotState, StreamCallbacks};
use crate::time::{Ticks, ms_from_ticks, ticks_from_secs_f32};

use self::text::{Page, ends_mid_word, parse_timestamps, split_pages};

/// Seek distance of the smooth fast-forward/reverse controls, in ticks.
pub const SCROLL_STEP: Ticks = 300;
/// Most segments a single multi-track splice will load.
pub const MAX_MULTI_TRACKS: usize = 20;

/// Per-page callback, fired when the page's subtitle becomes current.
/// Runs with the speech slot locked; must not call back into the runtime.
pub type ChunkCallback = Arc<dyn Fn() + Send + Sync>;

/// One audio segment of a track.
pub(crate) struct Chunk {
    /// Owned by the chunk; the speech sample borrows it while active.
    decoder: SharedDecoder,
    /// Position of this chunk on the track timeline, seconds.
    start_secs: f32,
    duration_secs: f32,
    /// True for subtitle pages; page navigation walks these.
    tag_me: bool,
    track_num: u32,
    text: Mutex<Option<String>>,
    callback: Option<ChunkCallback>,
}

impl Chunk {
    fn end_secs(&self) -> f32 {
        self.start_secs + self.duration_secs
    }
}

/// Reference to a subtitle page, for iteration by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtitleRef(usize);

#[derive(Default)]
struct TrackInner {
    chunks: Vec<Arc<Chunk>>,
    /// The speech sample; created on the first named splice, destroyed by
    /// `stop`.
    sample: Option<Arc<Sample>>,
    /// Index of the chunk currently feeding the stream.
    active: Option<usize>,
    /// The chunk whose subtitle is on screen.
    active_subtitle: Option<Arc<Chunk>>,
    track_count: u32,
    /// Merge the next spliced page into the current subtitle instead of
    /// starting a new one. Consumed by one chunk, set by multi-splices.
    no_page_break: bool,
    /// File behind the most recent named splice.
    last_name: Option<String>,
    /// Accumulated offset into `last_name` for the next page window.
    next_start_ms: u32,
}

/// State shared between the player API and the speech-sample callbacks.
pub(crate) struct TrackState {
    inner: Mutex<TrackInner>,
    /// Track length in ticks, Release-published by `play`; 0 = no track.
    length: AtomicI64,
}

/// Mark `chunk`'s subtitle current and run its page callback.
/// Caller holds the speech slot mutex (directly or via a stream callback).
fn do_track_tag(inner: &mut TrackInner, chunk: Arc<Chunk>) {
    if let Some(callback) = &chunk.callback {
        callback();
    }
    inner.active_subtitle = Some(chunk);
}

/// The callback set installed on the speech sample.
struct TrackCallbacks {
    state: Weak<TrackState>,
}

impl StreamCallbacks for TrackCallbacks {
    fn on_start_stream(&self, sample: &Sample) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut inner = state.inner.lock();
        let ours = inner
            .sample
            .as_ref()
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), sample));
        if !ours {
            tracing::warn!(target: "track::play", "stream start on foreign sample refused");
            return false;
        }
        let Some(index) = inner.active else {
            return false;
        };
        let chunk = inner.chunks[index].clone();
        sample.set_decoder(Some(chunk.decoder.clone()));
        sample.set_offset(ticks_from_secs_f32(chunk.start_secs));
        if chunk.tag_me {
            do_track_tag(&mut inner, chunk);
        }
        true
    }

    fn on_end_chunk(&self, sample: &Sample, buffer: BufferId) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut inner = state.inner.lock();
        let Some(index) = inner.active else {
            return false;
        };
        let Some(next) = inner.chunks.get(index + 1).cloned() else {
            // Last chunk ran out; let the stream drain and end.
            return false;
        };
        inner.active = Some(index + 1);
        sample.set_decoder(Some(next.decoder.clone()));
        if let Err(e) = next.decoder.lock().rewind() {
            tracing::warn!(target: "track::play", error = %e, "chunk decoder rewind failed");
        }
        if next.tag_me {
            // The subtitle flips when this buffer (the first to carry the
            // new chunk's audio) finishes playing.
            sample.set_tag(buffer, next.clone());
        }
        true
    }

    fn on_end_stream(&self, _sample: &Sample) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut inner = state.inner.lock();
        inner.active = None;
        inner.active_subtitle = None;
    }

    fn on_tagged_buffer(&self, _sample: &Sample, payload: crate::stream::TagPayload) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let Ok(chunk) = payload.downcast::<Chunk>() else {
            tracing::warn!(target: "track::play", "buffer tag with foreign payload dropped");
            return;
        };
        let mut inner = state.inner.lock();
        do_track_tag(&mut inner, chunk);
    }
}

/// The speech track orchestrator.
pub(crate) struct TrackPlayer {
    shared: Arc<Shared>,
    loader: Arc<dyn SoundLoader>,
    state: Arc<TrackState>,
}

impl TrackPlayer {
    pub fn new(shared: Arc<Shared>, loader: Arc<dyn SoundLoader>) -> Self {
        Self {
            shared,
            loader,
            state: Arc::new(TrackState {
                inner: Mutex::new(TrackInner::default()),
                length: AtomicI64::new(0),
            }),
        }
    }

    /// Published track length in ticks (0 = no track armed).
    pub fn length(&self) -> Ticks {
        self.state.length.load(Ordering::Acquire)
    }

    /// Append chunks for a new track (`name` given) or more subtitle pages
    /// for the current one (`name` absent). Explicit `timestamps` replace
    /// the per-page display times computed from the text.
    pub fn splice(
        &self,
        name: Option<&str>,
        subtitle: Option<&str>,
        timestamps: Option<&str>,
        callback: Option<ChunkCallback>,
    ) -> Result<()> {
        let mut pages = match subtitle {
            Some(text) => split_pages(text),
            None => vec![Page {
                text: None,
                time_ms: -MIN_PAGE_MS,
            }],
        };
        if let Some(stamps) = timestamps {
            for (page, stamp) in pages.iter_mut().zip(parse_timestamps(stamps)) {
                page.time_ms = stamp as i32;
            }
        }

        let mut inner = self.state.inner.lock();
        let file = match name {
            Some(n) => {
                if inner.sample.is_none() {
                    let callbacks = Arc::new(TrackCallbacks {
                        state: Arc::downgrade(&self.state),
                    });
                    inner.sample =
                        Some(Sample::new(self.shared.mixer.clone(), SPEECH_BUFFERS, callbacks)?);
                }
                inner.track_count += 1;
                inner.last_name = Some(n.to_string());
                inner.next_start_ms = 0;
                n.to_string()
            }
            None => {
                if inner.chunks.is_empty() {
                    tracing::warn!(target: "track::splice", "page splice with no track, ignored");
                    return Ok(());
                }
                match &inner.last_name {
                    Some(n) => n.clone(),
                    None => {
                        tracing::warn!(target: "track::splice", "page splice with no file, ignored");
                        return Ok(());
                    }
                }
            }
        };
        let track_num = inner.track_count;

        // A continuation whose previous page was cut mid-word gets visual
        // stitching: the old page trails off, the new one leads in.
        let mut bridge = false;
        if name.is_none()
            && let Some(prev) = inner.chunks.last()
        {
            let mut prev_text = prev.text.lock();
            if let Some(t) = prev_text.as_mut()
                && ends_mid_word(t)
            {
                t.push_str("...");
                bridge = true;
            }
        }

        for (i, page) in pages.into_iter().enumerate() {
            let run_ms = if page.time_ms < 0 {
                None
            } else {
                Some(page.time_ms as u32)
            };
            let raw = self.loader.open(&file).map_err(Error::Decoder)?;
            let clip =
                ClipDecoder::new(raw, inner.next_start_ms, run_ms).map_err(Error::Decoder)?;
            let duration = clip.length();
            inner.next_start_ms += (duration * 1000.0) as u32;

            let mut text = page.text;
            if bridge && i == 0 {
                text = text.map(|t| format!("..{}", t));
            }

            let tagged = !inner.no_page_break;
            inner.no_page_break = false;
            if !tagged {
                // Merged page: its words join the current subtitle.
                if let Some(t) = text.take() {
                    merge_into_last_subtitle(&inner.chunks, &t);
                }
            }

            let start = inner.chunks.last().map(|c| c.end_secs()).unwrap_or(0.0);
            inner.chunks.push(Arc::new(Chunk {
                decoder: share(Box::new(clip)),
                start_secs: start,
                duration_secs: duration,
                tag_me: tagged,
                track_num,
                text: Mutex::new(text),
                callback: callback.clone(),
            }));
        }
        tracing::debug!(
            target: "track::splice",
            track = track_num,
            chunks = inner.chunks.len(),
            "track spliced"
        );
        Ok(())
    }

    /// Append fully pre-decoded segments to the current track. The first
    /// segment may carry `subtitle`; the rest are silent continuations of
    /// it, and so is whatever gets spliced next.
    pub fn splice_multi(&self, names: &[&str], subtitle: Option<&str>) -> Result<()> {
        let mut inner = self.state.inner.lock();
        if inner.sample.is_none() || inner.chunks.is_empty() {
            tracing::warn!(target: "track::splice", "multi splice with no track, ignored");
            return Ok(());
        }
        let track_num = inner.track_count;

        for (i, name) in names.iter().take(MAX_MULTI_TRACKS).enumerate() {
            let mut raw = match self.loader.open(name) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(target: "track::splice", name, error = %e, "segment open failed");
                    continue;
                }
            };
            let (frequency, format) = (raw.frequency(), raw.format());
            let data = match raw.decode_all() {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(target: "track::splice", name, error = %e, "segment decode failed");
                    continue;
                }
            };
            let memory = MemoryDecoder::new(data, frequency, format);
            let duration = memory.length();

            let tagged = i == 0 && !inner.no_page_break;
            if i == 0 {
                inner.no_page_break = false;
                if !tagged && let Some(t) = subtitle {
                    merge_into_last_subtitle(&inner.chunks, t);
                }
            }
            let text = if tagged {
                subtitle.map(str::to_string)
            } else {
                None
            };

            let start = inner.chunks.last().map(|c| c.end_secs()).unwrap_or(0.0);
            inner.chunks.push(Arc::new(Chunk {
                decoder: share(Box::new(memory)),
                start_secs: start,
                duration_secs: duration,
                tag_me: tagged,
                track_num,
                text: Mutex::new(text),
                callback: None,
            }));
        }
        // The next page continues this subtitle rather than opening one.
        inner.no_page_break = true;
        Ok(())
    }

    /// Bind the speech sample and start from the first chunk.
    pub fn play(&self) -> Result<()> {
        let (sample, length) = {
            let mut inner = self.state.inner.lock();
            let Some(sample) = inner.sample.clone() else {
                tracing::warn!(target: "track::play", "play with no track, ignored");
                return Ok(());
            };
            if inner.chunks.is_empty() {
                tracing::warn!(target: "track::play", "play with no chunks, ignored");
                return Ok(());
            }
            inner.active = Some(0);
            let length = ticks_from_secs_f32(inner.chunks.last().unwrap().end_secs());
            (sample, length)
        };
        self.state.length.store(length, Ordering::Release);

        self.shared
            .set_speech_volume(self.shared.speech_volume());
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        self.shared
            .play_stream_locked(SPEECH_SOURCE, &mut st, sample, false, true, true)
    }

    /// Tear the track down: stop the stream, drop the chunks and the
    /// sample. The sample's decoder binding is detached first; it only
    /// borrows the active chunk's decoder.
    pub fn stop(&self) {
        {
            let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
            self.shared.stop_stream_locked(SPEECH_SOURCE, &mut st);
        }
        let mut inner = self.state.inner.lock();
        inner.active = None;
        inner.active_subtitle = None;
        if let Some(sample) = inner.sample.take() {
            sample.set_decoder(None);
        }
        inner.chunks.clear();
        inner.track_count = 0;
        inner.no_page_break = false;
        inner.last_name = None;
        inner.next_start_ms = 0;
        self.state.length.store(0, Ordering::Release);
    }

    pub fn pause(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        if st.sample.is_some() {
            self.shared.pause_stream_locked(SPEECH_SOURCE, &mut st);
        }
    }

    pub fn resume(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        if st.sample.is_some() {
            self.shared.resume_stream_locked(SPEECH_SOURCE, &mut st);
        }
    }

    pub fn playing(&self) -> bool {
        let st = self.shared.slots[SPEECH_SOURCE].state.lock();
        st.sample.is_some() && st.stream_should_be_playing
    }

    /// Jump to an absolute track offset in ticks.
    pub fn jump(&self, offset: Ticks) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        self.seek_locked(&mut st, offset);
    }

    pub fn fast_forward_smooth(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        let pos = self.position_locked(&st);
        self.seek_locked(&mut st, pos + SCROLL_STEP);
    }

    pub fn fast_reverse_smooth(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        let pos = self.position_locked(&st);
        self.restart_if_ended_locked(&mut st);
        self.seek_locked(&mut st, pos - SCROLL_STEP);
    }

    /// Skip to the next subtitle page; past the last page the track ends
    /// cleanly.
    pub fn fast_forward_page(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        let length = self.length();
        if length == 0 {
            return;
        }
        let target = {
            let inner = self.state.inner.lock();
            let current = self.current_page_index(&inner);
            inner
                .chunks
                .iter()
                .enumerate()
                .skip(current.map(|i| i + 1).unwrap_or(0))
                .find(|(_, c)| c.tag_me)
                .map(|(_, c)| ticks_from_secs_f32(c.start_secs))
                .unwrap_or(length + 1)
        };
        if target <= length {
            self.restart_if_ended_locked(&mut st);
        }
        self.seek_locked(&mut st, target);
    }

    /// Back to the previous subtitle page, restarting playback if the
    /// stream had already ended.
    pub fn fast_reverse_page(&self) {
        let mut st = self.shared.slots[SPEECH_SOURCE].state.lock();
        if self.length() == 0 {
            return;
        }
        let target = {
            let inner = self.state.inner.lock();
            let current = self.current_page_index(&inner).unwrap_or(0);
            inner.chunks[..current]
                .iter()
                .rev()
                .find(|c| c.tag_me)
                .map(|c| ticks_from_secs_f32(c.start_secs))
                .unwrap_or(0)
        };
        self.restart_if_ended_locked(&mut st);
        self.seek_locked(&mut st, target);
    }

    /// Current position scaled to `units`: `units × position / length`.
    /// A zero length means no track and always yields zero.
    pub fn position(&self, units: i64) -> i64 {
        let length = self.state.length.load(Ordering::Acquire);
        if length == 0 {
            return 0;
        }
        let st = self.shared.slots[SPEECH_SOURCE].state.lock();
        units * self.position_locked(&st) / length
    }

    /// Current track offset in ticks, clamped to the track.
    pub fn current_pos(&self) -> Ticks {
        let st = self.shared.slots[SPEECH_SOURCE].state.lock();
        self.position_locked(&st)
    }

    /// Subtitle text of the page currently on screen.
    pub fn subtitle(&self) -> Option<String> {
        let inner = self.state.inner.lock();
        inner
            .active_subtitle
            .as_ref()
            .and_then(|c| c.text.lock().clone())
    }

    pub fn first_subtitle(&self) -> Option<SubtitleRef> {
        let inner = self.state.inner.lock();
        inner
            .chunks
            .iter()
            .position(|c| c.tag_me)
            .map(SubtitleRef)
    }

    pub fn next_subtitle(&self, current: SubtitleRef) -> Option<SubtitleRef> {
        let inner = self.state.inner.lock();
        inner
            .chunks
            .iter()
            .enumerate()
            .skip(current.0 + 1)
            .find(|(_, c)| c.tag_me)
            .map(|(i, _)| SubtitleRef(i))
    }

    pub fn subtitle_text(&self, page: SubtitleRef) -> Option<String> {
        let inner = self.state.inner.lock();
        inner.chunks.get(page.0).and_then(|c| c.text.lock().clone())
    }

    // ---- internals (speech slot locked) ----

    /// Current track offset from the slot's timing anchor. `start_time`
    /// survives a stream stop, so a track that ended (including a seek
    /// past its end) reads back clamped to its length until `stop`
    /// retires the track and zeroes the published length.
    fn position_locked(&self, st: &SlotState) -> Ticks {
        let length = self.state.length.load(Ordering::Acquire);
        if length == 0 {
            return 0;
        }
        let at = if st.pause_time != 0 {
            st.pause_time
        } else {
            self.shared.clock.now()
        };
        (at - st.start_time).clamp(0, length)
    }

    /// Index of the chunk whose subtitle is current, falling back to the
    /// streaming chunk.
    fn current_page_index(&self, inner: &TrackInner) -> Option<usize> {
        if let Some(subtitle) = &inner.active_subtitle {
            inner
                .chunks
                .iter()
                .position(|c| Arc::ptr_eq(c, subtitle))
                .or(inner.active)
        } else {
            inner.active
        }
    }

    fn restart_if_ended_locked(&self, st: &mut SlotState) {
        if st.stream_should_be_playing {
            return;
        }
        let sample = {
            let mut inner = self.state.inner.lock();
            let Some(sample) = inner.sample.clone() else {
                return;
            };
            if inner.active.is_none() {
                inner.active = Some(0);
            }
            sample
        };
        if let Err(e) =
            self.shared
                .play_stream_locked(SPEECH_SOURCE, st, sample, false, true, false)
        {
            tracing::warn!(target: "track::play", error = %e, "track restart failed");
        }
    }

    /// Reposition the track. Walks the chunk list for the chunk containing
    /// `offset` and the last subtitle page at or before it; past the end,
    /// stops the stream instead.
    fn seek_locked(&self, st: &mut SlotState, offset: Ticks) {
        let length = self.state.length.load(Ordering::Acquire);
        if length == 0 {
            tracing::warn!(target: "track::play", "seek with no track, ignored");
            return;
        }
        let offset = offset.clamp(0, length + 1);
        st.start_time = self.shared.clock.now() - offset;

        let mut inner = self.state.inner.lock();
        let Some(sample) = inner.sample.clone() else {
            return;
        };

        let mut hit: Option<usize> = None;
        let mut last_page: Option<usize> = None;
        let mut acc: Ticks = 0;
        for (i, chunk) in inner.chunks.iter().enumerate() {
            let duration = ticks_from_secs_f32(chunk.duration_secs);
            if chunk.tag_me && acc <= offset {
                last_page = Some(i);
            }
            if acc + duration > offset {
                hit = Some(i);
                break;
            }
            acc += duration;
        }

        match hit {
            Some(index) => {
                let chunk = inner.chunks[index].clone();
                let intra_ms = ms_from_ticks(offset - acc).max(0) as u32;
                tracing::debug!(
                    target: "track::play",
                    track = chunk.track_num,
                    chunk = index,
                    intra_ms,
                    "track seek"
                );
                if let Err(e) = chunk.decoder.lock().seek(intra_ms) {
                    tracing::warn!(target: "track::play", error = %e, "chunk seek failed");
                }
                sample.set_decoder(Some(chunk.decoder.clone()));
                inner.active = Some(index);
                if let Some(page) = last_page {
                    let page_chunk = inner.chunks[page].clone();
                    do_track_tag(&mut inner, page_chunk);
                }
            }
            None => {
                // Past every chunk: end the track.
                drop(inner);
                self.shared.stop_stream_locked(SPEECH_SOURCE, st);
                let mut inner = self.state.inner.lock();
                inner.active = None;
                inner.active_subtitle = None;
            }
        }
    }
}

/// Append `text` to the most recent subtitle page.
fn merge_into_last_subtitle(chunks: &[Arc<Chunk>], text: &str) {
    if text.is_empty() {
        return;
    }
    let Some(chunk) = chunks.iter().rev().find(|c| c.tag_me) else {
        return;
    };
    let mut existing = chunk.text.lock();
    match existing.as_mut() {
        Some(t) => {
            if !t.ends_with(char::is_whitespace) {
                t.push(' ');
            }
            t.push_str(text);
        }
        None => *existing = Some(text.to_string()),
    }
}
