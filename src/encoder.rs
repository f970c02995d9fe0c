//! Opus frame encoder.
//!
//! Accumulates decoded PCM into fixed-duration frames and encodes each one
//! as a single Opus packet. The encoder is synchronous; the encode worker
//! drives it from the chunk queue.

use audiopus::coder::Encoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};

use crate::chunk::PcmChunk;
use crate::frame::OpusFrame;
use crate::{AudioProfile, StreamConfig, StreamError};

/// Output buffer size for a single encoded packet.
///
/// Comfortably above the largest packet libopus produces for one frame.
const MAX_PACKET_BYTES: usize = 4000;

/// Result of asking the encoder for its next frame.
#[derive(Debug)]
pub(crate) enum EncodeOutput {
    /// One frame's worth of audio was encoded.
    Frame(OpusFrame),
    /// Not enough buffered samples for a full frame yet.
    NeedMoreInput,
    /// A full frame was dropped because libopus rejected it.
    Skipped {
        /// Production index the dropped frame would have had.
        seq: u64,
        /// What libopus reported.
        message: String,
    },
}

/// Accumulating Opus encoder.
///
/// `push` buffers decoded samples; `poll` drains one frame at a time;
/// `finish` zero-pads and encodes the partial tail at end of stream.
/// After a seek, `reset` discards buffered audio and restarts the packet
/// sequence under the new epoch.
pub(crate) struct FrameEncoder {
    encoder: Encoder,
    config: StreamConfig,
    samples_per_frame: usize,
    buffer: Vec<i16>,
    scratch: Vec<u8>,
    produced: u64,
    epoch: u32,
    skipped: u64,
}

impl FrameEncoder {
    pub(crate) fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let encoder = build_encoder(config)?;
        Ok(Self {
            encoder,
            config: config.clone(),
            samples_per_frame: config.samples_per_frame(),
            buffer: Vec::new(),
            scratch: vec![0u8; MAX_PACKET_BYTES],
            produced: 0,
            epoch: 0,
            skipped: 0,
        })
    }

    /// Buffers a chunk's samples for encoding.
    pub(crate) fn push(&mut self, chunk: &PcmChunk) {
        self.buffer.extend_from_slice(&chunk.samples);
    }

    /// Encodes the next full frame, if one is buffered.
    pub(crate) fn poll(&mut self) -> EncodeOutput {
        if self.buffer.len() < self.samples_per_frame {
            return EncodeOutput::NeedMoreInput;
        }
        let input: Vec<i16> = self.buffer.drain(..self.samples_per_frame).collect();
        self.encode_frame(&input)
    }

    /// Flushes the partial tail at end of stream.
    ///
    /// The remaining samples are zero-padded up to one full frame. Returns
    /// `None` when the stream ended exactly on a frame boundary.
    pub(crate) fn finish(&mut self) -> Option<EncodeOutput> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut input = std::mem::take(&mut self.buffer);
        input.resize(self.samples_per_frame, 0);
        Some(self.encode_frame(&input))
    }

    /// Discards buffered audio and restarts packet state for a new epoch.
    ///
    /// libopus carries inter-frame prediction state, so the encoder is
    /// rebuilt rather than fed audio from a discontinuous position.
    pub(crate) fn reset(&mut self, epoch: u32) -> Result<(), StreamError> {
        self.encoder = build_encoder(&self.config)?;
        self.buffer.clear();
        self.produced = 0;
        self.epoch = epoch;
        Ok(())
    }

    /// Total frames dropped on encoder failures so far.
    pub(crate) fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Interleaved samples currently buffered.
    #[cfg(test)]
    pub(crate) fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    fn encode_frame(&mut self, input: &[i16]) -> EncodeOutput {
        let seq = self.produced;
        self.produced += 1;
        match self.encoder.encode(input, &mut self.scratch) {
            Ok(len) => {
                EncodeOutput::Frame(OpusFrame::new(seq, self.epoch, self.scratch[..len].to_vec()))
            }
            Err(e) => {
                self.skipped += 1;
                EncodeOutput::Skipped {
                    seq,
                    message: e.to_string(),
                }
            }
        }
    }
}

fn build_encoder(config: &StreamConfig) -> Result<Encoder, StreamError> {
    let sample_rate = <SampleRate as audiopus::TryFrom<i32>>::try_from(config.sample_rate as i32)
        .map_err(|e| StreamError::Encode {
            message: format!("sample rate rejected: {e}"),
            skipped: 0,
        })?;
    let channels = if config.channels == 1 {
        Channels::Mono
    } else {
        Channels::Stereo
    };
    let application = match config.profile {
        AudioProfile::Music => Application::Audio,
        AudioProfile::Speech => Application::Voip,
    };

    let mut encoder =
        Encoder::new(sample_rate, channels, application).map_err(|e| StreamError::Encode {
            message: format!("failed to create encoder: {e}"),
            skipped: 0,
        })?;
    encoder
        .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
        .map_err(|e| StreamError::Encode {
            message: format!("failed to set bitrate: {e}"),
            skipped: 0,
        })?;
    Ok(encoder)
}
