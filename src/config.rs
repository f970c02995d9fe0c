//! Configuration types for streaming sessions.

use std::time::Duration;

use crate::error::StreamError;

/// Sample rates the Opus codec accepts, in Hz.
const SUPPORTED_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

/// Frame durations the Opus codec accepts, in microseconds.
const SUPPORTED_FRAME_MICROS: [u128; 6] = [2500, 5000, 10000, 20000, 40000, 60000];

/// Encoding profiles for common content types.
///
/// A profile selects the encoder's signal tuning and a matching bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioProfile {
    /// Full-band music at 128 kbps.
    ///
    /// The right choice for arbitrary program material.
    #[default]
    Music,

    /// Voice-optimized encoding at 64 kbps.
    ///
    /// Trades high-frequency fidelity for robustness on speech.
    Speech,
}

impl AudioProfile {
    /// Returns the bitrate this profile targets, in bits per second.
    #[must_use]
    pub fn bitrate(&self) -> u32 {
        match self {
            Self::Music => 128_000,
            Self::Speech => 64_000,
        }
    }
}

/// Configuration for stream behavior.
///
/// Use [`StreamConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use opuscast::StreamConfig;
/// use std::time::Duration;
///
/// let config = StreamConfig {
///     frame_duration: Duration::from_millis(40),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Sample rate of the PCM fed to the encoder, in Hz.
    ///
    /// The decoder subprocess is told to resample to this rate.
    /// Must be one of 8000, 12000, 16000, 24000, 48000.
    /// Default: 48000
    pub sample_rate: u32,

    /// Channel count of the PCM fed to the encoder (1 or 2).
    ///
    /// Default: 2
    pub channels: u16,

    /// Duration of each encoded frame.
    ///
    /// Also the delivery cadence: one frame is released per tick.
    /// Must be 2.5, 5, 10, 20, 40 or 60 milliseconds.
    /// Default: 20ms
    pub frame_duration: Duration,

    /// Encoder output bitrate, in bits per second.
    ///
    /// Default: 128000
    pub bitrate: u32,

    /// Encoder signal tuning.
    ///
    /// Default: [`AudioProfile::Music`]
    pub profile: AudioProfile,

    /// Capacity of the encoded-frame queue, in frames.
    ///
    /// Bounds how far encoding may run ahead of delivery. Deeper queues
    /// absorb decoder jitter but add restart latency after a seek.
    /// Must be between 2 and 5. Default: 4
    pub queue_depth: usize,

    /// Delivery attempts per frame before the session fails.
    ///
    /// Counts the initial send; `3` means one send and two retries.
    /// Default: 3
    pub send_retry_attempts: u32,

    /// Initial delay between delivery retry attempts.
    ///
    /// Uses exponential backoff (delay doubles each attempt).
    /// Default: 50ms
    pub send_retry_delay: Duration,

    /// Deadline for a single delivery attempt.
    ///
    /// A send that has not completed within this window counts as a
    /// failed attempt. Default: 1s
    pub send_timeout: Duration,

    /// Deadline for the decoder subprocess to start and produce audio.
    ///
    /// Covers process spawn plus the first PCM block. Default: 10s
    pub start_timeout: Duration,

    /// How many consecutive encode failures to skip before giving up.
    ///
    /// Each skip is reported via [`StreamEvent::FrameSkipped`]; exceeding
    /// this budget ends the session with [`StreamError::Encode`].
    /// Default: 8
    ///
    /// [`StreamEvent::FrameSkipped`]: crate::StreamEvent::FrameSkipped
    pub max_encode_skips: u64,

    /// Path or name of the transcoder executable.
    ///
    /// Resolved through `PATH` when not absolute. Default: "ffmpeg"
    pub ffmpeg_path: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            frame_duration: Duration::from_millis(20),
            bitrate: 128_000,
            profile: AudioProfile::Music,
            queue_depth: 4,
            send_retry_attempts: 3,
            send_retry_delay: Duration::from_millis(50),
            send_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(10),
            max_encode_skips: 8,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl StreamConfig {
    /// Checks every field against the ranges the codec and pipeline accept.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(StreamError::InvalidConfig {
                message: format!(
                    "sample rate {}Hz not supported (use one of {SUPPORTED_SAMPLE_RATES:?})",
                    self.sample_rate
                ),
            });
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(StreamError::InvalidConfig {
                message: format!("channel count {} not supported (use 1 or 2)", self.channels),
            });
        }
        if !SUPPORTED_FRAME_MICROS.contains(&self.frame_duration.as_micros()) {
            return Err(StreamError::InvalidConfig {
                message: format!(
                    "frame duration {:?} not supported (use 2.5, 5, 10, 20, 40 or 60 ms)",
                    self.frame_duration
                ),
            });
        }
        if !(500..=512_000).contains(&self.bitrate) {
            return Err(StreamError::InvalidConfig {
                message: format!("bitrate {} out of range (500..=512000)", self.bitrate),
            });
        }
        if !(2..=5).contains(&self.queue_depth) {
            return Err(StreamError::InvalidConfig {
                message: format!("queue depth {} out of range (2..=5)", self.queue_depth),
            });
        }
        if self.send_retry_attempts == 0 {
            return Err(StreamError::InvalidConfig {
                message: "send retry attempts must be at least 1".to_string(),
            });
        }
        if self.send_timeout.is_zero() {
            return Err(StreamError::InvalidConfig {
                message: "send timeout must be non-zero".to_string(),
            });
        }
        if self.start_timeout.is_zero() {
            return Err(StreamError::InvalidConfig {
                message: "start timeout must be non-zero".to_string(),
            });
        }
        if self.ffmpeg_path.is_empty() {
            return Err(StreamError::InvalidConfig {
                message: "ffmpeg path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Number of interleaved i16 samples in one frame, across all channels.
    ///
    /// For the defaults (48kHz stereo, 20ms) this is 1920.
    #[must_use]
    pub fn samples_per_frame(&self) -> usize {
        let per_channel =
            (u128::from(self.sample_rate) * self.frame_duration.as_micros()) / 1_000_000;
        per_channel as usize * self.channels as usize
    }
}

/// An opaque authentication token for the transport sink.
///
/// The token is read from the environment exactly once at session
/// construction and handed to the sink during
/// [`FrameSink::on_start`](crate::FrameSink::on_start). It is never logged
/// and never written to disk: `Debug` output is redacted and there is no
/// `Display` implementation.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    /// Reads a token from the given environment variable.
    ///
    /// Leading and trailing whitespace is stripped.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MissingToken`] if the variable is unset or
    /// holds only whitespace.
    pub fn from_env(variable: &str) -> Result<Self, StreamError> {
        match std::env::var(variable) {
            Ok(value) if !value.trim().is_empty() => Ok(Self(value.trim().to_string())),
            _ => Err(StreamError::MissingToken {
                variable: variable.to_string(),
            }),
        }
    }

    /// Wraps an already-obtained token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token value for use in an authentication exchange.
    ///
    /// Callers must not log or persist the returned string.
    #[must_use]
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken(***)")
    }
}
