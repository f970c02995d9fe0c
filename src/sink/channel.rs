//! Tokio mpsc channel sink implementation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::sink::FrameSink;
use crate::{OpusFrame, SinkError};

/// A sink that sends encoded frames to a tokio mpsc channel.
///
/// This is the usual way to bridge the pipeline to an existing connection:
/// a writer task owns the socket and receives paced frames from the channel.
///
/// # Example
///
/// ```
/// use opuscast::{ChannelSink, OpusFrame};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<OpusFrame>(8);
/// let sink = ChannelSink::new(tx);
///
/// // Use sink with the OpusCast builder...
/// // Then receive frames:
/// // while let Some(frame) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<OpusFrame>,
}

impl ChannelSink {
    /// Creates a new channel sink with the given sender.
    ///
    /// Keep the channel shallow: frames arrive at real-time cadence, and a
    /// deep buffer here just turns into playback latency on the far side.
    pub fn new(sender: mpsc::Sender<OpusFrame>) -> Self {
        Self {
            name: "channel".to_string(),
            sender,
        }
    }

    /// Creates a new channel sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<OpusFrame>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError> {
        self.sender
            .send(frame.clone())
            .await
            .map_err(|_| SinkError::ChannelClosed)
    }
}
