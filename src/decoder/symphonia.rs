//! Symphonia-backed decoder and file loader.
//!
//! Supported formats: MP3, FLAC, OGG Vorbis, WAV/PCM, AAC (in MP4).
//! Output is interleaved signed 16-bit native-endian PCM regardless of the
//! source sample format.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder as _, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::{Decoder, DecoderError, DecoderStatus, PcmFormat, SoundLoader};

/// Streaming decoder over symphonia's probe/format/codec stack.
pub struct SymphoniaDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    frequency: u32,
    format: PcmFormat,
    length_secs: f32,
    time_base: Option<symphonia::core::units::TimeBase>,
    /// Converted bytes not yet handed to the caller
    pending: Vec<u8>,
    pending_pos: usize,
    current_secs: f32,
    looping: bool,
    status: DecoderStatus,
}

impl SymphoniaDecoder {
    /// Open a file for decoding.
    pub fn open(path: &Path) -> Result<Self, DecoderError> {
        let file = File::open(path)
            .map_err(|e| DecoderError::NotFound(format!("{}: {}", path.display(), e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| DecoderError::Format(e.to_string()))?;

        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecoderError::Format("no audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let frequency = codec_params
            .sample_rate
            .ok_or_else(|| DecoderError::Format("unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);
        if channels == 0 || channels > 2 {
            return Err(DecoderError::Format(format!(
                "unsupported channel count: {}",
                channels
            )));
        }

        let time_base = codec_params.time_base;
        let length_secs = if let Some(n_frames) = codec_params.n_frames {
            if let Some(tb) = time_base {
                let time = tb.calc_time(n_frames);
                time.seconds as f32 + time.frac as f32
            } else {
                n_frames as f32 / frequency as f32
            }
        } else {
            0.0
        };

        let decoder_opts = DecoderOptions::default();
        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &decoder_opts)
            .map_err(|e| DecoderError::Format(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            frequency,
            format: PcmFormat { bits: 16, channels },
            length_secs,
            time_base,
            pending: Vec::new(),
            pending_pos: 0,
            current_secs: 0.0,
            looping: false,
            status: DecoderStatus::Ready,
        })
    }

    /// Decode one packet into `pending`. Returns false at end of stream.
    fn refill(&mut self) -> Result<bool, DecoderError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecoderError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            if let Some(tb) = self.time_base {
                let time = tb.calc_time(packet.ts());
                self.current_secs = time.seconds as f32 + time.frac as f32;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue, // Skip bad frame
                Err(e) => return Err(DecoderError::Decode(e.to_string())),
            };

            self.pending.clear();
            self.pending_pos = 0;
            convert_to_i16_bytes(&decoded, &mut self.pending);
            return Ok(true);
        }
    }

    fn restart(&mut self) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from(0.0),
            track_id: Some(self.track_id),
        };
        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DecoderError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.current_secs = 0.0;
        self.status = DecoderStatus::Ready;
        Ok(())
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&mut self, out: &mut [u8]) -> Result<usize, DecoderError> {
        if self.status == DecoderStatus::Failed {
            return Err(DecoderError::Decode("decoder already failed".into()));
        }

        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                let more = match self.refill() {
                    Ok(more) => more,
                    Err(e) => {
                        self.status = DecoderStatus::Failed;
                        return Err(e);
                    }
                };
                if !more {
                    if self.looping {
                        self.restart()?;
                        continue;
                    }
                    self.status = DecoderStatus::EndOfStream;
                    break;
                }
            }
            let avail = &self.pending[self.pending_pos..];
            let n = avail.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&avail[..n]);
            self.pending_pos += n;
            written += n;
        }
        Ok(written)
    }

    fn rewind(&mut self) -> Result<(), DecoderError> {
        self.restart()
    }

    fn seek(&mut self, pos_ms: u32) -> Result<u32, DecoderError> {
        let target = pos_ms as f64 / 1000.0;
        let seek_to = SeekTo::Time {
            time: Time::from(target),
            track_id: Some(self.track_id),
        };
        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| DecoderError::Seek(e.to_string()))?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.current_secs = target as f32;
        self.status = DecoderStatus::Ready;
        Ok(pos_ms)
    }

    fn time(&self) -> f32 {
        self.current_secs
    }

    fn length(&self) -> f32 {
        self.length_secs
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

/// Convert a decoded buffer to interleaved i16 native-endian bytes.
fn convert_to_i16_bytes(buffer: &AudioBufferRef, out: &mut Vec<u8>) {
    fn push(out: &mut Vec<u8>, sample: i16) {
        out.extend_from_slice(&sample.to_ne_bytes());
    }

    match buffer {
        AudioBufferRef::F32(buf) => {
            let planes = buf.planes();
            let plane_slice = planes.planes();
            if plane_slice.is_empty() {
                return;
            }
            let frames = plane_slice[0].len();
            out.reserve(frames * plane_slice.len() * 2);
            for frame in 0..frames {
                for plane in plane_slice {
                    let s = (plane[frame].clamp(-1.0, 1.0) * 32767.0) as i16;
                    push(out, s);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            let planes = buf.planes();
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    push(out, plane[frame]);
                }
            }
        }
        AudioBufferRef::S24(buf) => {
            let planes = buf.planes();
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    push(out, (plane[frame].0 >> 8) as i16);
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            let planes = buf.planes();
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    push(out, (plane[frame] >> 16) as i16);
                }
            }
        }
        AudioBufferRef::U8(buf) => {
            let planes = buf.planes();
            for frame in 0..buf.frames() {
                for plane in planes.planes() {
                    push(out, ((plane[frame] as i16) - 128) << 8);
                }
            }
        }
        _ => {}
    }
}

/// Opens decoders from a directory on disk.
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SoundLoader for FileLoader {
    fn open(&self, name: &str) -> Result<Box<dyn Decoder>, DecoderError> {
        let path = self.root.join(name);
        Ok(Box::new(SymphoniaDecoder::open(&path)?))
    }
}
