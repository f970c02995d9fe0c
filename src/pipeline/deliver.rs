//! Deliver worker: pushes frames into the sink with retry logic.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::OpusFrame;
use crate::session::SessionState;
use crate::sink::FrameSink;
use crate::{EventCallback, SinkError, StreamConfig, StreamError, StreamEvent};

/// Sends paced frames to the sink and owns the session's terminal work.
///
/// Being the last stage, this worker always sees the pipeline drain, so
/// it calls `on_stop()` on the sink and emits the one `Ended` event no
/// matter how the session ends.
pub(crate) struct DeliverWorker {
    sink: Box<dyn FrameSink>,
    frame_rx: mpsc::Receiver<OpusFrame>,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    retry_attempts: u32,
    retry_delay: Duration,
    send_timeout: Duration,
    tick_ms: u64,
}

impl DeliverWorker {
    pub fn new(
        sink: Box<dyn FrameSink>,
        frame_rx: mpsc::Receiver<OpusFrame>,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            sink,
            frame_rx,
            state,
            event_callback,
            retry_attempts: config.send_retry_attempts,
            retry_delay: config.send_retry_delay,
            send_timeout: config.send_timeout,
            tick_ms: config.frame_duration.as_millis() as u64,
        }
    }

    pub async fn run(mut self) {
        while let Some(frame) = self.frame_rx.recv().await {
            if frame.epoch < self.state.epoch.load(Ordering::SeqCst) {
                // left over from before a seek
                continue;
            }
            let last = frame.is_final;
            if !self.send_with_retry(&frame).await {
                break;
            }
            self.state.frames_delivered.fetch_add(1, Ordering::SeqCst);
            self.state
                .bytes_delivered
                .fetch_add(frame.payload.len() as u64, Ordering::SeqCst);
            if !frame.is_silence {
                // silence holds the cadence but does not advance playback
                self.state.position_ms.fetch_add(self.tick_ms, Ordering::SeqCst);
            }
            if last {
                break;
            }
        }

        self.state.begin_stopping();
        if let Err(error) = self.sink.on_stop().await {
            tracing::warn!("sink '{}' failed to stop: {}", self.sink.name(), error);
        }
        if self.state.finish() {
            self.emit(StreamEvent::Ended {
                error: self.state.error_message(),
            });
        }
        tracing::debug!(
            "deliver worker stopped after {} frame(s)",
            self.state.frames_delivered.load(Ordering::SeqCst)
        );
    }

    /// One frame, up to `retry_attempts` tries with exponential backoff.
    ///
    /// Returns `false` when the sink is given up on; the transport error
    /// is recorded and no further frames will be sent.
    async fn send_with_retry(&self, frame: &OpusFrame) -> bool {
        let mut attempts: u32 = 0;
        let mut delay = self.retry_delay;
        loop {
            let result = match tokio::time::timeout(self.send_timeout, self.sink.send(frame)).await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout {
                    waited: self.send_timeout,
                }),
            };
            match result {
                Ok(()) => return true,
                Err(error) => {
                    attempts += 1;
                    tracing::warn!(
                        "sink '{}' send failed (attempt {}/{}): {}",
                        self.sink.name(),
                        attempts,
                        self.retry_attempts,
                        error
                    );
                    self.emit(StreamEvent::SinkError {
                        sink_name: self.sink.name().to_string(),
                        error: error.to_string(),
                        attempt: attempts,
                    });
                    if attempts >= self.retry_attempts {
                        tracing::error!(
                            "sink '{}' unreachable, ending session",
                            self.sink.name()
                        );
                        self.state.store_error(StreamError::Transport {
                            sink_name: self.sink.name().to_string(),
                            message: error.to_string(),
                            attempts,
                        });
                        self.state.running.store(false, Ordering::SeqCst);
                        return false;
                    }
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    if !self.state.running.load(Ordering::SeqCst) {
                        // shutdown requested mid-retry; not a sink failure
                        return false;
                    }
                }
            }
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Spawns the deliver worker on the current runtime.
pub(crate) fn spawn_deliver_worker(worker: DeliverWorker) -> JoinHandle<()> {
    tokio::spawn(worker.run())
}
