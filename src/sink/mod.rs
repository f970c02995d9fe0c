//! Sink trait and implementations for frame destinations.
//!
//! A [`FrameSink`] is any destination that can receive encoded frames. The
//! crate provides two built-in sinks:
//!
//! - [`ChannelSink`]: Sends frames to a tokio mpsc channel
//! - [`FileSink`]: Dumps frames to a length-prefixed file
//!
//! You can implement the [`FrameSink`] trait for custom destinations like
//! network connections or voice gateways.

mod channel;
mod file;

pub use channel::ChannelSink;
pub use file::FileSink;

use std::time::Duration;

use async_trait::async_trait;

use crate::{AuthToken, OpusFrame, SinkError, StreamConfig};

/// Stream parameters handed to a sink when delivery begins.
///
/// Carries the negotiated audio format and, when configured, the
/// authentication token the sink needs to establish its connection. The
/// token is only reachable through [`SinkContext::token`] and never
/// appears in `Debug` output.
#[derive(Debug, Clone)]
pub struct SinkContext {
    /// Sample rate of the encoded audio, in Hz.
    pub sample_rate: u32,

    /// Channel count of the encoded audio.
    pub channels: u16,

    /// Duration of each frame; also the delivery cadence.
    pub frame_duration: Duration,

    /// Encoder bitrate, in bits per second.
    pub bitrate: u32,

    token: Option<AuthToken>,
}

impl SinkContext {
    pub(crate) fn new(config: &StreamConfig, token: Option<AuthToken>) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_duration: config.frame_duration,
            bitrate: config.bitrate,
            token,
        }
    }

    /// Returns the authentication token, if one was configured.
    #[must_use]
    pub fn token(&self) -> Option<&AuthToken> {
        self.token.as_ref()
    }
}

/// A destination for encoded frames.
///
/// Sinks receive frames from the delivery worker at real-time cadence and
/// forward them (send over a connection, write to a file, hand to a
/// channel, etc.).
///
/// # Implementation Notes
///
/// - Methods take `&self` - use interior mutability (`Mutex`, `RwLock`) if needed
/// - All methods are async and run on the tokio runtime
/// - `on_start` is called before any frames flow and receives the stream
///   format plus the authentication token; open connections here
/// - `on_stop` is called during graceful shutdown; close resources here
/// - `send` may be called again with the same frame when a failed attempt
///   is retried; ensure retries are safe
///
/// # Example
///
/// ```
/// use opuscast::{FrameSink, OpusFrame, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink {
///     name: String,
/// }
///
/// #[async_trait]
/// impl FrameSink for PrintSink {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError> {
///         println!("Frame {}: {} bytes", frame.seq, frame.payload.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Called once before delivery begins.
    ///
    /// Use this to open connections or allocate resources. `ctx` carries
    /// the negotiated format and the authentication token. Errors here are
    /// fatal and will prevent the session from starting.
    ///
    /// Default implementation does nothing.
    async fn on_start(&self, _ctx: &SinkContext) -> Result<(), SinkError> {
        Ok(())
    }

    /// Deliver one encoded frame.
    ///
    /// Called once per tick, silence frames included. Errors are
    /// recoverable - the delivery worker emits a
    /// [`StreamEvent::SinkError`] and retries based on [`StreamConfig`]
    /// settings.
    ///
    /// [`StreamEvent::SinkError`]: crate::StreamEvent::SinkError
    /// [`StreamConfig`]: crate::StreamConfig
    async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError>;

    /// Called during graceful shutdown.
    ///
    /// Use this to flush buffers, close connections, or clean up
    /// resources. This is called even if errors occurred during delivery.
    ///
    /// Default implementation does nothing.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
