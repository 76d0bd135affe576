//! Windowed decoder adapter.
//!
//! The track player opens one decoder per subtitle page, each covering a
//! window of the same file: a start offset plus a run length. The final
//! page's window is open-ended (runs to the end of the audio).

use super::{Decoder, DecoderError, DecoderStatus, PcmFormat};

/// A decoder restricted to a window of its inner stream.
pub struct ClipDecoder {
    inner: Box<dyn Decoder>,
    start_ms: u32,
    /// Window length; `None` = to the end of the inner stream.
    run_ms: Option<u32>,
    /// Byte budget for the window, frame-aligned. `None` = unbounded.
    budget: Option<usize>,
    consumed: usize,
    looping: bool,
    status: DecoderStatus,
}

impl ClipDecoder {
    /// Open a window of `inner` at `start_ms` for `run_ms` (or to the end
    /// of the stream when `run_ms` is `None`). Seeks the inner decoder to
    /// the window start.
    pub fn new(
        mut inner: Box<dyn Decoder>,
        start_ms: u32,
        run_ms: Option<u32>,
    ) -> Result<Self, DecoderError> {
        if start_ms > 0 {
            inner.seek(start_ms)?;
        }
        let budget = run_ms.map(|ms| {
            let format = inner.format();
            let bytes = format.bytes_for_ms(inner.frequency(), ms);
            bytes - bytes % format.frame_bytes()
        });
        Ok(Self {
            inner,
            start_ms,
            run_ms,
            budget,
            consumed: 0,
            looping: false,
            status: DecoderStatus::Ready,
        })
    }

    fn remaining(&self) -> Option<usize> {
        self.budget.map(|b| b.saturating_sub(self.consumed))
    }
}

impl Decoder for ClipDecoder {
    fn decode(&mut self, out: &mut [u8]) -> Result<usize, DecoderError> {
        if self.status == DecoderStatus::Failed {
            return Err(DecoderError::Decode("decoder already failed".into()));
        }

        let want = match self.remaining() {
            Some(0) => {
                if self.looping {
                    self.rewind()?;
                    out.len().min(self.remaining().unwrap_or(out.len()))
                } else {
                    self.status = DecoderStatus::EndOfStream;
                    return Ok(0);
                }
            }
            Some(rest) => out.len().min(rest),
            None => out.len(),
        };

        let n = match self.inner.decode(&mut out[..want]) {
            Ok(n) => n,
            Err(e) => {
                self.status = DecoderStatus::Failed;
                return Err(e);
            }
        };
        self.consumed += n;

        self.status = if self.remaining() == Some(0) {
            DecoderStatus::EndOfStream
        } else {
            self.inner.status()
        };
        Ok(n)
    }

    fn rewind(&mut self) -> Result<(), DecoderError> {
        self.inner.seek(self.start_ms)?;
        self.consumed = 0;
        self.status = DecoderStatus::Ready;
        Ok(())
    }

    fn seek(&mut self, pos_ms: u32) -> Result<u32, DecoderError> {
        let pos_ms = match self.run_ms {
            Some(run) => pos_ms.min(run),
            None => pos_ms,
        };
        let reached = self.inner.seek(self.start_ms + pos_ms)?;
        let rel = reached.saturating_sub(self.start_ms);
        self.consumed = self
            .inner
            .format()
            .bytes_for_ms(self.inner.frequency(), rel);
        self.status = DecoderStatus::Ready;
        Ok(rel)
    }

    fn time(&self) -> f32 {
        (self.inner.time() - self.start_ms as f32 / 1000.0).max(0.0)
    }

    fn length(&self) -> f32 {
        match self.run_ms {
            Some(run) => run as f32 / 1000.0,
            None => (self.inner.length() - self.start_ms as f32 / 1000.0).max(0.0),
        }
    }

    fn frequency(&self) -> u32 {
        self.inner.frequency()
    }

    fn format(&self) -> PcmFormat {
        self.inner.format()
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
