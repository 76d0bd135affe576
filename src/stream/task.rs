//! The background streaming task.
//!
//! One dedicated thread drives the music and speech slots: it recycles
//! played buffers through the decoder, fires the chunk/tag callbacks,
//! feeds the scope rings and steps any active music fade. Effect channels
//! are never touched; the task's world starts at `MUSIC_SOURCE`.
//!
//! The loop blocks on a wake channel while nothing is streaming (block
//! when idle, poll when busy) and yields between iterations otherwise.
//! Shutdown is a Release-stored flag observed with
//! Acquire at the top of the loop, plus a channel message to cut the idle
//! sleep short.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::decoder::DecoderStatus;
use crate::mixer::SourceState;

use super::{MUSIC_SOURCE, NUM_SOURCES, Shared, SlotState};
use std::sync::Arc;

/// Messages nudging the task loop.
pub(crate) enum TaskSignal {
    /// A stream just started or resumed; stop idling.
    Wake,
    /// Orderly exit.
    Shutdown,
}

/// Idle sleep between iterations when no stream is active.
const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Spawn the streaming task thread.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    signals: Receiver<TaskSignal>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stream-task".to_string())
        .spawn(move || {
            // A decoder or backend panic must not take the thread down
            // without a trace; the slots stay consistent because every
            // mutation happens under a slot lock that unwinding releases.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                task_main(&shared, &signals);
            }));
            if result.is_err() {
                tracing::error!(target: "stream::task", "streaming task panicked");
            }
        })
}

fn task_main(shared: &Shared, signals: &Receiver<TaskSignal>) {
    tracing::debug!(target: "stream::task", "streaming task up");
    let mut scratch = vec![0u8; shared.chunk_bytes];

    while !shared.shutdown.load(Ordering::Acquire) {
        if let Some(volume) = shared.fade.process(shared.clock.now()) {
            shared.set_music_volume(volume);
        }

        let mut active = 0usize;
        for slot in MUSIC_SOURCE..NUM_SOURCES {
            let mut st = shared.slots[slot].state.lock();
            if !should_service(&st) {
                continue;
            }
            process_stream(shared, slot, &mut st, &mut scratch);
            active += 1;
        }

        if active == 0 && !shared.fade.active() {
            match signals.recv_timeout(IDLE_SLEEP) {
                Ok(TaskSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(TaskSignal::Wake) | Err(RecvTimeoutError::Timeout) => {}
            }
        } else {
            if let Ok(TaskSignal::Shutdown) = signals.try_recv() {
                break;
            }
            thread::yield_now();
        }
    }
    tracing::debug!(target: "stream::task", "streaming task down");
}

/// Whether a slot needs a recycle pass. A live stream is always serviced.
/// A stream whose playing flag dropped early (a decode failure clears it)
/// is still driven until its queue drains and the end-of-stream callback
/// has fired. Paused and unbound slots are left alone.
pub(crate) fn should_service(st: &SlotState) -> bool {
    st.sample.is_some()
        && st.pause_time == 0
        && (st.stream_should_be_playing || !st.stream_ended)
}

/// One recycle pass over a streaming slot. Caller holds the slot lock and
/// has checked [`should_service`].
pub(crate) fn process_stream(shared: &Shared, slot: usize, st: &mut SlotState, scratch: &mut [u8]) {
    let Some(sample) = st.sample.clone() else {
        return;
    };
    let source = shared.slots[slot].source;
    let callbacks = sample.callbacks();

    let processed = match shared.mixer.buffers_processed(source) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(target: "stream::task", slot, error = %e, "processed query failed");
            return;
        }
    };
    let queued = shared.mixer.buffers_queued(source).unwrap_or(0);
    let state = shared
        .mixer
        .source_state(source)
        .unwrap_or(SourceState::Stopped);

    if processed == 0 && state != SourceState::Playing {
        // A failed decoder counts as "at end": nothing will ever refill
        // the queue, so the drain must terminate here.
        let at_end = sample
            .decoder()
            .map(|d| {
                matches!(
                    d.lock().status(),
                    DecoderStatus::EndOfStream | DecoderStatus::Failed
                )
            })
            .unwrap_or(true);
        if queued == 0 && at_end {
            // The queue drained and the decoder has nothing more: the
            // stream is over.
            tracing::debug!(
                target: "stream::task",
                slot,
                last_buffer = ?st.last_queued_buf,
                "stream finished"
            );
            st.stream_should_be_playing = false;
            st.stream_ended = true;
            callbacks.on_end_stream(&sample);
            return;
        }
        // Starved: the device ran out before we refilled. Restart from
        // whatever is still queued.
        tracing::warn!(target: "stream::task", slot, queued, "buffer underrun, restarting source");
        if let Err(e) = shared.mixer.play(source) {
            tracing::warn!(target: "stream::task", slot, error = %e, "underrun restart failed");
        }
    }

    let mut end_chunk_failed = false;
    for _ in 0..processed {
        let buffer = match shared.mixer.unqueue_buffers(source, 1) {
            Ok(mut buffers) if !buffers.is_empty() => buffers.remove(0),
            Ok(_) => break,
            Err(e) => {
                tracing::warn!(target: "stream::task", slot, error = %e, "unqueue failed");
                break;
            }
        };

        // The tag fires now: this buffer's audio has just finished
        // playing. This is the subtitle-sync edge.
        if let Some(payload) = sample.take_tag(buffer) {
            callbacks.on_tagged_buffer(&sample, payload);
        }

        if let Some(ring) = &mut st.scope {
            let played = shared.mixer.buffer_size(buffer).unwrap_or(0);
            ring.pop(played, shared.clock.now());
        }

        if end_chunk_failed {
            continue;
        }
        let Some(mut decoder) = sample.decoder() else {
            continue;
        };
        let status = decoder.lock().status();
        match status {
            DecoderStatus::EndOfStream => {
                // Chunk boundary: the callback is the only way a new
                // decoder can come in on a live sample.
                if !callbacks.on_end_chunk(&sample, buffer) {
                    end_chunk_failed = true;
                    continue;
                }
                match sample.decoder() {
                    Some(d) => decoder = d,
                    None => {
                        end_chunk_failed = true;
                        continue;
                    }
                }
            }
            DecoderStatus::Failed => {
                // The buffer is lost from the queue; better than spinning
                // on a broken source.
                continue;
            }
            DecoderStatus::Ready => {}
        }

        let n = match decoder.lock().decode(scratch) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(target: "stream::task", slot, error = %e, "decode failed, stopping stream");
                st.stream_should_be_playing = false;
                continue;
            }
        };
        if n == 0 {
            continue;
        }

        let (format, frequency) = {
            let d = decoder.lock();
            (d.format(), d.frequency())
        };
        if let Err(e) = shared.mixer.upload(buffer, format, &scratch[..n], frequency) {
            tracing::warn!(target: "stream::task", slot, error = %e, "upload failed");
            continue;
        }
        if let Err(e) = shared.mixer.queue_buffers(source, &[buffer]) {
            tracing::warn!(target: "stream::task", slot, error = %e, "queue failed");
            continue;
        }
        st.last_queued_buf = Some(buffer);
        callbacks.on_queue_buffer(&sample, buffer);
        if let Some(ring) = &mut st.scope {
            ring.push(&scratch[..n]);
        }
    }
}
