//! Decoder over PCM already resident in memory.
//!
//! Used wherever audio is pre-decoded up front and then streamed from RAM,
//! such as the fully decoded segments of a multi-part speech track.

use super::{Decoder, DecoderError, DecoderStatus, PcmFormat};

pub struct MemoryDecoder {
    data: Vec<u8>,
    pos: usize,
    frequency: u32,
    format: PcmFormat,
    looping: bool,
    status: DecoderStatus,
}

impl MemoryDecoder {
    pub fn new(data: Vec<u8>, frequency: u32, format: PcmFormat) -> Self {
        Self {
            data,
            pos: 0,
            frequency,
            format,
            looping: false,
            status: DecoderStatus::Ready,
        }
    }

    fn byte_rate(&self) -> usize {
        self.frequency as usize * self.format.frame_bytes()
    }
}

impl Decoder for MemoryDecoder {
    fn decode(&mut self, out: &mut [u8]) -> Result<usize, DecoderError> {
        let mut written = 0;
        while written < out.len() {
            let rest = &self.data[self.pos..];
            if rest.is_empty() {
                if self.looping && !self.data.is_empty() {
                    self.pos = 0;
                    continue;
                }
                self.status = DecoderStatus::EndOfStream;
                break;
            }
            let n = rest.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&rest[..n]);
            self.pos += n;
            written += n;
        }
        if !self.looping && self.pos >= self.data.len() {
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
        self.pos = target.min(self.data.len());
        self.status = if self.pos >= self.data.len() && !self.looping {
            DecoderStatus::EndOfStream
        } else {
            DecoderStatus::Ready
        };
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
        self.data.len() as f32 / self.byte_rate().max(1) as f32
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_and_eof() {
        let mut dec = MemoryDecoder::new(vec![1; 100], 11025, PcmFormat::MONO_16);
        let mut buf = [0u8; 64];
        assert_eq!(dec.decode(&mut buf).unwrap(), 64);
        assert_eq!(dec.status(), DecoderStatus::Ready);
        assert_eq!(dec.decode(&mut buf).unwrap(), 36);
        assert_eq!(dec.status(), DecoderStatus::EndOfStream);
        assert_eq!(dec.decode(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_looping_wraps() {
        let mut dec = MemoryDecoder::new(vec![7; 10], 11025, PcmFormat::MONO_16);
        dec.set_looping(true);
        let mut buf = [0u8; 25];
        assert_eq!(dec.decode(&mut buf).unwrap(), 25);
        assert_eq!(dec.status(), DecoderStatus::Ready);
    }

    #[test]
    fn test_seek_frame_aligned() {
        // Stereo 16-bit: 4-byte frames.
        let mut dec = MemoryDecoder::new(vec![0; 4000], 1000, PcmFormat::STEREO_16);
        dec.seek(500).unwrap();
        assert!((dec.time() - 0.5).abs() < 0.01);
        let mut buf = [0u8; 4];
        dec.decode(&mut buf).unwrap();
    }

    #[test]
    fn test_length() {
        let dec = MemoryDecoder::new(vec![0; 22050], 11025, PcmFormat::MONO_16);
        assert!((dec.length() - 1.0).abs() < 1e-6);
    }
}
