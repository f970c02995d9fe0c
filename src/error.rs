//! Error types for opuscast.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`StreamError`]): End or prevent a streaming session
//! - **Recoverable events**: Per-delivery issues surfaced via [`EventCallback`](crate::EventCallback)

use std::path::PathBuf;
use std::time::Duration;

use crate::session::PlaybackState;

/// Fatal errors that end or prevent a streaming session.
///
/// Configuration and startup failures are returned from
/// [`OpusCastBuilder::start()`]. Runtime failures (decoder crash, delivery
/// retry exhaustion) terminate the session and are returned from
/// [`Session::wait()`] or [`Session::stop()`]. Transient issues (a single
/// slow send, one undecodable frame) are handled via the event callback
/// instead.
///
/// [`OpusCastBuilder::start()`]: crate::OpusCastBuilder::start
/// [`Session::wait()`]: crate::Session::wait
/// [`Session::stop()`]: crate::Session::stop
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The decoder subprocess failed to start, crashed, or produced
    /// unreadable output.
    #[error("decode failed: {message}")]
    Decode {
        /// Description of what went wrong, including captured decoder
        /// diagnostics where available.
        message: String,
        /// Whether any audio was delivered before the failure.
        partial: bool,
    },

    /// Frame encoding failed persistently.
    ///
    /// Isolated encode failures are skipped and reported via
    /// [`StreamEvent::FrameSkipped`](crate::StreamEvent::FrameSkipped); this
    /// error means the skip budget was exhausted.
    #[error("encode failed after skipping {skipped} frame(s): {message}")]
    Encode {
        /// Description of the last encoder failure.
        message: String,
        /// How many frames were skipped before giving up.
        skipped: u64,
    },

    /// Frame delivery failed and all retries were exhausted.
    #[error("transport failed on sink '{sink_name}' after {attempts} attempt(s): {message}")]
    Transport {
        /// Name of the sink that failed.
        sink_name: String,
        /// Description of the final delivery failure.
        message: String,
        /// Total send attempts made for the frame that failed.
        attempts: u32,
    },

    /// A control operation was invoked in a state that does not permit it.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted (e.g. "pause", "seek").
        operation: String,
        /// The session state at the time of the call.
        state: PlaybackState,
    },

    /// A seek was requested on a source that cannot be repositioned.
    #[error("source '{description}' does not support seeking")]
    SeekUnsupported {
        /// Description of the non-seekable source.
        description: String,
    },

    /// The authentication token environment variable is unset or empty.
    #[error("authentication token not found in environment variable {variable}")]
    MissingToken {
        /// Name of the environment variable that was consulted.
        variable: String,
    },

    /// The stream configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong with the configuration.
        message: String,
    },

    /// No source was configured before starting.
    #[error("no source configured - call source() or mock_source() before start()")]
    NoSourceConfigured,

    /// No sink was configured before starting.
    #[error("no sink configured - call sink() before start()")]
    NoSinkConfigured,

    /// The sink failed during initialization.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink that failed.
        sink_name: String,
        /// Why the sink failed to start.
        reason: String,
    },
}

/// Errors that can occur within a [`FrameSink`](crate::FrameSink) implementation.
///
/// Sink errors are recoverable - the delivery worker emits a
/// [`StreamEvent::SinkError`] and retries the send with backoff. Only when
/// retries are exhausted does the failure escalate to
/// [`StreamError::Transport`].
///
/// [`StreamEvent::SinkError`]: crate::StreamEvent::SinkError
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A send operation failed.
    #[error("send failed: {reason}")]
    SendFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// A send operation did not complete within the configured deadline.
    #[error("send timed out after {waited:?}")]
    Timeout {
        /// How long the delivery worker waited before giving up.
        waited: Duration,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    FileError {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sink was used before initialization.
    #[error("sink not initialized (call on_start first)")]
    NotInitialized,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a send failed error with the given reason.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileError {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::Decode {
            message: "ffmpeg exited with code 1".to_string(),
            partial: false,
        };
        assert_eq!(err.to_string(), "decode failed: ffmpeg exited with code 1");
    }

    #[test]
    fn test_transport_error_display() {
        let err = StreamError::Transport {
            sink_name: "udp".to_string(),
            message: "connection reset".to_string(),
            attempts: 4,
        };
        assert_eq!(
            err.to_string(),
            "transport failed on sink 'udp' after 4 attempt(s): connection reset"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = StreamError::InvalidState {
            operation: "pause".to_string(),
            state: PlaybackState::Ended,
        };
        assert_eq!(err.to_string(), "cannot pause while ended");
    }

    #[test]
    fn test_sink_error_custom() {
        let err = SinkError::custom("something went wrong");
        assert_eq!(err.to_string(), "something went wrong");
    }

    #[test]
    fn test_sink_error_send_failed() {
        let err = SinkError::send_failed("socket buffer full");
        assert_eq!(err.to_string(), "send failed: socket buffer full");
    }

    #[test]
    fn test_sink_error_timeout() {
        let err = SinkError::Timeout {
            waited: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_sink_error_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = SinkError::file_error("/tmp/frames.opus", io_err);
        assert!(err.to_string().contains("/tmp/frames.opus"));
    }
}
