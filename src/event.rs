//! Runtime events for monitoring session health.
//!
//! Events are notifications about session behavior. Most are informational
//! and the session continues after they are emitted; [`StreamEvent::Ended`]
//! is the one terminal event.

use std::sync::Arc;
use std::time::Duration;

/// Runtime events emitted during a streaming session.
///
/// Use the [`EventCallback`] to log these or update metrics. The callback
/// runs on pipeline tasks, so it must not block.
///
/// # Example
///
/// ```
/// use opuscast::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::DecoderStarted { description } => {
///             eprintln!("decoder up: {}", description);
///         }
///         StreamEvent::Started => eprintln!("playing"),
///         StreamEvent::Paused => eprintln!("paused"),
///         StreamEvent::Resumed => eprintln!("resumed"),
///         StreamEvent::Seeked { position } => {
///             eprintln!("seeked to {:?}", position);
///         }
///         StreamEvent::Underrun { seq, total } => {
///             eprintln!("underrun at frame {} ({} total)", seq, total);
///         }
///         StreamEvent::SinkError { sink_name, error, attempt } => {
///             eprintln!("sink '{}' attempt {} failed: {}", sink_name, attempt, error);
///         }
///         StreamEvent::FrameSkipped { seq, error, skipped } => {
///             eprintln!("skipped frame {} ({} so far): {}", seq, skipped, error);
///         }
///         StreamEvent::Ended { error } => match error {
///             Some(e) => eprintln!("ended with error: {}", e),
///             None => eprintln!("ended"),
///         },
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The decoder subprocess spawned and produced its first audio.
    DecoderStarted {
        /// Description of the source being decoded.
        description: String,
    },

    /// The first frame was released and real-time delivery began.
    Started,

    /// Playback was paused; the delivery clock is stopped.
    Paused,

    /// Playback resumed; the delivery clock was re-based so the paused
    /// gap is not burst through.
    Resumed,

    /// A seek completed and delivery restarted from the new position.
    Seeked {
        /// The position that playback resumed from.
        position: Duration,
    },

    /// No encoded frame was ready at a delivery deadline.
    ///
    /// A silence frame was sent in its place to hold the cadence. The
    /// session continues; frequent underruns indicate the decoder or
    /// encoder cannot keep up with real time.
    Underrun {
        /// Delivery sequence number the silence frame occupied.
        seq: u64,
        /// Total underruns so far in this session.
        total: u64,
    },

    /// A delivery attempt to the sink failed.
    ///
    /// The delivery worker retries according to
    /// [`StreamConfig`](crate::StreamConfig) settings. If retries are
    /// exhausted the session ends with
    /// [`StreamError::Transport`](crate::StreamError::Transport).
    SinkError {
        /// Name of the sink that errored.
        sink_name: String,
        /// Description of the error.
        error: String,
        /// Which attempt failed (1 is the initial send).
        attempt: u32,
    },

    /// The encoder failed on one frame's worth of audio and dropped it.
    ///
    /// The session continues unless the skip budget
    /// ([`StreamConfig::max_encode_skips`](crate::StreamConfig::max_encode_skips))
    /// is exhausted.
    FrameSkipped {
        /// Production sequence number of the dropped frame.
        seq: u64,
        /// Description of the encoder failure.
        error: String,
        /// Total frames skipped so far in this session.
        skipped: u64,
    },

    /// The session reached its terminal state.
    ///
    /// Emitted exactly once, whether the stream completed, was stopped,
    /// or failed.
    Ended {
        /// The fatal error that ended the session, if any.
        error: Option<String>,
    },
}

/// Callback type for receiving runtime events.
///
/// Register an event callback via [`OpusCastBuilder::on_event()`] to
/// receive notifications about underruns, sink errors, and state changes.
///
/// [`OpusCastBuilder::on_event()`]: crate::OpusCastBuilder::on_event
///
/// # Example
///
/// ```ignore
/// use opuscast::{OpusCast, StreamEvent};
///
/// let session = OpusCast::builder()
///     .on_event(|event| {
///         tracing::warn!(?event, "stream event");
///     })
///     .start()
///     .await?;
/// ```
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// This is a convenience function for creating event callbacks without
/// manually wrapping in `Arc`.
///
/// # Example
///
/// ```
/// use opuscast::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_debug() {
        let event = StreamEvent::Underrun { seq: 17, total: 3 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("Underrun"));
        assert!(debug.contains("17"));
    }

    #[test]
    fn test_stream_event_clone() {
        let event = StreamEvent::SinkError {
            sink_name: "file".to_string(),
            error: "disk full".to_string(),
            attempt: 2,
        };
        let cloned = event.clone();
        if let StreamEvent::SinkError {
            sink_name,
            error,
            attempt,
        } = cloned
        {
            assert_eq!(sink_name, "file");
            assert_eq!(error, "disk full");
            assert_eq!(attempt, 2);
        } else {
            panic!("Expected SinkError variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(StreamEvent::Started);
        assert!(called.load(Ordering::SeqCst));
    }
}
