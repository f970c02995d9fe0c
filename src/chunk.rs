//! PCM data chunk with metadata.

use std::time::Duration;

/// A discrete block of decoded PCM samples with associated metadata.
///
/// `PcmChunk` is the unit of data between the decode and encode stages.
/// Each chunk carries interleaved 16-bit samples along with ordering and
/// format information. Chunks flow through a single bounded queue with one
/// consumer, so samples are owned directly rather than shared.
///
/// # Example
///
/// ```
/// use opuscast::PcmChunk;
///
/// let chunk = PcmChunk::new(vec![0i16; 1920], 0, 0, 48000, 2);
/// assert_eq!(chunk.duration(), std::time::Duration::from_millis(20));
/// ```
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Interleaved PCM samples in 16-bit signed integer format.
    pub samples: Vec<i16>,

    /// Production sequence number, starting at 0 within each epoch.
    pub seq: u64,

    /// Playback epoch this chunk belongs to.
    ///
    /// The epoch is bumped on every seek; stages discard chunks whose
    /// epoch is older than the session's current one.
    pub epoch: u32,

    /// Sample rate in Hz (e.g., 16000, 48000).
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,

    /// Marks the last chunk of the source.
    ///
    /// End-of-stream chunks are normally empty and exist so the encoder
    /// knows to flush and pad its partial tail.
    pub end_of_stream: bool,
}

impl PcmChunk {
    /// Creates a new `PcmChunk` with the given parameters.
    pub fn new(samples: Vec<i16>, seq: u64, epoch: u32, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            seq,
            epoch,
            sample_rate,
            channels,
            end_of_stream: false,
        }
    }

    /// Creates the empty chunk that marks the end of the source.
    pub fn end_of_stream(seq: u64, epoch: u32, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            seq,
            epoch,
            sample_rate,
            channels,
            end_of_stream: true,
        }
    }

    /// Returns the playback duration of this chunk.
    ///
    /// Calculated from the number of samples, sample rate, and channel count.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Returns the number of sample frames in this chunk.
    ///
    /// A sample frame contains one sample per channel.
    pub fn sample_frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Returns `true` if this chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
