//! Mock PCM source for testing without a decoder subprocess.

use std::time::Duration;

use async_trait::async_trait;

use crate::source::PcmSource;
use crate::{StreamConfig, StreamError};

/// A mock source that serves synthetic audio for testing.
///
/// This allows testing the full pipeline without spawning ffmpeg, making
/// it suitable for CI environments. Audio is scripted up front with the
/// generator methods, then served block by block; stalls and failures can
/// be injected to exercise the underrun and error paths.
///
/// # Example
///
/// ```
/// use opuscast::MockSource;
///
/// let mut mock = MockSource::new(48000, 2);
///
/// // Script 100ms of silence followed by a 440Hz sine wave
/// mock.generate_silence(100);
/// mock.generate_sine(440.0, 1000);
///
/// // Use with the OpusCast builder...
/// ```
pub struct MockSource {
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
    cursor: usize,
    block_samples: usize,
    blocks_read: usize,
    seekable: bool,
    stall_before_block: Option<(usize, Duration)>,
    fail_after_blocks: Option<usize>,
}

impl MockSource {
    /// Creates a new mock source with the given format.
    ///
    /// The format must match the session's [`StreamConfig`]; `start`
    /// rejects a mismatch so a mis-scripted test fails loudly instead of
    /// serving audio at the wrong rate.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples: Vec::new(),
            cursor: 0,
            block_samples: 0,
            blocks_read: 0,
            seekable: false,
            stall_before_block: None,
            fail_after_blocks: None,
        }
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Generates silence for the given duration in milliseconds.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let num_samples = self.samples_for_duration(duration_ms);
        self.samples
            .extend(std::iter::repeat(0i16).take(num_samples));
    }

    /// Generates a sine wave at the given frequency for the given duration.
    pub fn generate_sine(&mut self, frequency: f64, duration_ms: u64) {
        let num_frames = self.samples_for_duration(duration_ms) / self.channels as usize;
        let sample_rate = f64::from(self.sample_rate);

        for i in 0..num_frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            let sample = (value * 32767.0) as i16;

            // Write same sample to all channels
            for _ in 0..self.channels {
                self.samples.push(sample);
            }
        }
    }

    /// Generates white noise for the given duration.
    pub fn generate_noise(&mut self, duration_ms: u64, amplitude: f64) {
        let num_samples = self.samples_for_duration(duration_ms);
        let amplitude = (amplitude * 32767.0) as i16;

        // Simple LCG for deterministic "random" noise
        let mut seed: u32 = 12345;
        for _ in 0..num_samples {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let random = ((seed >> 16) as i32 - 32768) as i16;
            let sample = (i32::from(random) * i32::from(amplitude) / 32767) as i16;
            self.samples.push(sample);
        }
    }

    /// Adds raw samples directly.
    pub fn add_samples(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// Returns the duration of scripted audio.
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.channels as usize;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Makes `restart_at` reposition instead of failing.
    pub fn set_seekable(&mut self, seekable: bool) {
        self.seekable = seekable;
    }

    /// Injects a one-time delay before serving the given block index.
    ///
    /// Used to provoke pacer underruns deterministically.
    pub fn stall_before_block(&mut self, index: usize, delay: Duration) {
        self.stall_before_block = Some((index, delay));
    }

    /// Makes `read_block` fail after serving the given number of blocks.
    pub fn fail_after_blocks(&mut self, blocks: usize) {
        self.fail_after_blocks = Some(blocks);
    }

    fn samples_for_duration(&self, duration_ms: u64) -> usize {
        let frames = (self.sample_rate as u64 * duration_ms / 1000) as usize;
        frames * self.channels as usize
    }

    fn offset_for(&self, position: Duration) -> usize {
        let frames = (position.as_secs_f64() * f64::from(self.sample_rate)) as usize;
        (frames * self.channels as usize).min(self.samples.len())
    }
}

#[async_trait]
impl PcmSource for MockSource {
    fn description(&self) -> String {
        format!("mock:{}Hz/{}ch", self.sample_rate, self.channels)
    }

    fn supports_seek(&self) -> bool {
        self.seekable
    }

    async fn start(
        &mut self,
        config: &StreamConfig,
        position: Duration,
    ) -> Result<(), StreamError> {
        if config.sample_rate != self.sample_rate || config.channels != self.channels {
            return Err(StreamError::Decode {
                message: format!(
                    "mock source format {}Hz/{}ch does not match stream config {}Hz/{}ch",
                    self.sample_rate, self.channels, config.sample_rate, config.channels
                ),
                partial: false,
            });
        }
        self.block_samples = config.samples_per_frame();
        self.cursor = self.offset_for(position);
        self.blocks_read = 0;
        Ok(())
    }

    async fn read_block(&mut self) -> Result<Option<Vec<i16>>, StreamError> {
        if self.block_samples == 0 {
            return Err(StreamError::Decode {
                message: "mock source not started".to_string(),
                partial: false,
            });
        }

        if let Some((index, delay)) = self.stall_before_block {
            if self.blocks_read == index {
                self.stall_before_block = None;
                tokio::time::sleep(delay).await;
            }
        }

        if let Some(limit) = self.fail_after_blocks {
            if self.blocks_read >= limit {
                return Err(StreamError::Decode {
                    message: "mock source failure injected".to_string(),
                    partial: false,
                });
            }
        }

        if self.cursor >= self.samples.len() {
            return Ok(None);
        }

        let end = (self.cursor + self.block_samples).min(self.samples.len());
        let block = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        self.blocks_read += 1;
        Ok(Some(block))
    }

    async fn restart_at(&mut self, position: Duration) -> Result<(), StreamError> {
        if !self.seekable {
            return Err(StreamError::SeekUnsupported {
                description: self.description(),
            });
        }
        self.cursor = self.offset_for(position);
        Ok(())
    }
}
