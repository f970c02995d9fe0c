//! PCM source abstraction and decoder subprocess wrapper.
//!
//! This module provides the interface between the decoder (normally an
//! ffmpeg child process) and the rest of the opuscast pipeline.

mod ffmpeg;
mod mock;

pub use ffmpeg::FfmpegSource;
pub use mock::MockSource;

use std::time::Duration;

use async_trait::async_trait;

use crate::{StreamConfig, StreamError};

/// A supplier of decoded PCM audio.
///
/// The decode worker owns the source exclusively: it calls [`start`] once,
/// then pulls blocks with [`read_block`] until end of stream, a fatal
/// error, or shutdown. Sources that can reopen at an arbitrary position
/// additionally support [`restart_at`].
///
/// [`start`]: PcmSource::start
/// [`read_block`]: PcmSource::read_block
/// [`restart_at`]: PcmSource::restart_at
///
/// # Example
///
/// ```
/// use opuscast::{PcmSource, StreamConfig, StreamError};
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct OneBlockSource {
///     block: Option<Vec<i16>>,
/// }
///
/// #[async_trait]
/// impl PcmSource for OneBlockSource {
///     fn description(&self) -> String {
///         "one-block".to_string()
///     }
///
///     async fn start(
///         &mut self,
///         _config: &StreamConfig,
///         _position: Duration,
///     ) -> Result<(), StreamError> {
///         Ok(())
///     }
///
///     async fn read_block(&mut self) -> Result<Option<Vec<i16>>, StreamError> {
///         Ok(self.block.take())
///     }
/// }
/// ```
#[async_trait]
pub trait PcmSource: Send {
    /// Human-readable description for logging and error messages.
    fn description(&self) -> String;

    /// Whether this source can be reopened at an arbitrary position.
    ///
    /// Sessions reject seek requests up front when this returns `false`.
    /// Default implementation returns `false`.
    fn supports_seek(&self) -> bool {
        false
    }

    /// Opens the source and begins decoding.
    ///
    /// `config` carries the PCM format the source must produce
    /// (interleaved s16le at `config.sample_rate` / `config.channels`).
    /// `position` is the initial playback offset; sources that cannot
    /// start mid-stream should return an error for non-zero positions.
    async fn start(&mut self, config: &StreamConfig, position: Duration)
        -> Result<(), StreamError>;

    /// Pulls the next block of interleaved samples.
    ///
    /// Returns `Ok(None)` at end of stream. A block may be shorter than
    /// usual at the tail. Errors are fatal to the session.
    async fn read_block(&mut self) -> Result<Option<Vec<i16>>, StreamError>;

    /// Reopens the source at the given position, keeping the format from
    /// [`start`](PcmSource::start).
    ///
    /// Only called after [`supports_seek`](PcmSource::supports_seek)
    /// returned `true`. Default implementation fails with
    /// [`StreamError::SeekUnsupported`].
    async fn restart_at(&mut self, _position: Duration) -> Result<(), StreamError> {
        Err(StreamError::SeekUnsupported {
            description: self.description(),
        })
    }

    /// Releases the source and any resources it holds.
    ///
    /// Called exactly once during shutdown, after the last
    /// [`read_block`](PcmSource::read_block). Default implementation does
    /// nothing.
    async fn stop(&mut self) {}
}
