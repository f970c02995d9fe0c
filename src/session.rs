//! Streaming session management.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::pipeline::DecodeCommand;
use crate::{EventCallback, StreamError, StreamEvent};

/// Observable lifecycle states of a streaming session.
///
/// Sessions move strictly forward: `Idle` through `Starting` into
/// `Playing`, bouncing between `Playing` and `Paused`, and finally
/// through `Stopping` into `Ended`. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    /// Session constructed but not yet started.
    Idle = 0,
    /// Decoder and sink are being brought up.
    Starting = 1,
    /// Frames are being delivered at real-time cadence.
    Playing = 2,
    /// Delivery is suspended; the decoder stays warm.
    Paused = 3,
    /// Graceful shutdown in progress.
    Stopping = 4,
    /// Terminal state; no further frames will be delivered.
    Ended = 5,
}

impl PlaybackState {
    /// Decodes the atomic representation.
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Playing,
            3 => Self::Paused,
            4 => Self::Stopping,
            _ => Self::Ended,
        }
    }

    /// Returns `true` once the session can no longer deliver frames.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Statistics about a streaming session.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total frames delivered to the sink, silence included.
    pub frames_delivered: u64,
    /// Total payload bytes delivered to the sink.
    pub bytes_delivered: u64,
    /// Silence frames injected because no audio was ready in time.
    pub underruns: u64,
    /// Frames dropped on encoder failures.
    pub frames_skipped: u64,
    /// PCM chunks received from the decoder.
    pub chunks_decoded: u64,
    /// Playback position within the source.
    pub position: Duration,
}

/// Internal state shared between Session and the pipeline workers.
pub(crate) struct SessionState {
    pub running: AtomicBool,
    pub state: AtomicU8,
    pub epoch: AtomicU32,
    pub frames_delivered: AtomicU64,
    pub bytes_delivered: AtomicU64,
    pub underruns: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub chunks_decoded: AtomicU64,
    pub position_ms: AtomicU64,
    last_error: Mutex<Option<StreamError>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            state: AtomicU8::new(PlaybackState::Idle as u8),
            epoch: AtomicU32::new(0),
            frames_delivered: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            chunks_decoded: AtomicU64::new(0),
            position_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn playback_state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Attempts the `from` to `to` transition. Returns `false` if some
    /// other party moved the state first.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Marks graceful shutdown, unless the session already ended.
    pub fn begin_stopping(&self) {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if current == PlaybackState::Ended as u8 || current == PlaybackState::Stopping as u8 {
                return;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    PlaybackState::Stopping as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Moves the session to `Ended`, whatever the current state.
    ///
    /// Returns `true` for exactly one caller; that caller owns the
    /// terminal work (emitting the `Ended` event).
    pub fn finish(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if current == PlaybackState::Ended as u8 {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    PlaybackState::Ended as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.running.store(false, Ordering::SeqCst);
                return true;
            }
        }
    }

    /// Records a fatal error. The first error wins; later ones are
    /// dropped, since they are usually knock-on effects of the first.
    pub fn store_error(&self, mut error: StreamError) {
        if let StreamError::Decode { partial, .. } = &mut error {
            *partial = self.frames_delivered.load(Ordering::SeqCst) > 0;
        }
        let mut slot = self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// The stored fatal error, rendered for event reporting.
    pub fn error_message(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ToString::to_string)
    }

    /// Takes the stored fatal error, leaving the slot empty.
    pub fn take_error(&self) -> Option<StreamError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_delivered: self.frames_delivered.load(Ordering::SeqCst),
            bytes_delivered: self.bytes_delivered.load(Ordering::SeqCst),
            underruns: self.underruns.load(Ordering::SeqCst),
            frames_skipped: self.frames_skipped.load(Ordering::SeqCst),
            chunks_decoded: self.chunks_decoded.load(Ordering::SeqCst),
            position: Duration::from_millis(self.position_ms.load(Ordering::SeqCst)),
        }
    }
}

/// Handle to a running streaming session.
///
/// The `Session` is returned by [`OpusCastBuilder::start()`] and represents
/// an active stream. Decoding, encoding, and paced delivery run in
/// background tasks until the source ends, a fatal error occurs, `stop()`
/// is called, or the `Session` is dropped.
///
/// # Lifecycle
///
/// 1. Created by [`OpusCastBuilder::start()`]
/// 2. The pipeline runs in background, delivering one frame per tick
/// 3. Control it with [`pause()`](Session::pause),
///    [`resume()`](Session::resume), [`seek()`](Session::seek)
/// 4. Call [`stop()`](Session::stop) for early shutdown, or
///    [`wait()`](Session::wait) to run to the natural end of the source
/// 5. Dropping the `Session` also stops the pipeline (but prefer explicit
///    `stop()`)
///
/// # Example
///
/// ```ignore
/// let session = OpusCast::builder()
///     .source(FfmpegSource::new("track.mp3"))
///     .sink(ChannelSink::new(tx))
///     .start()
///     .await?;
///
/// session.pause().await?;
/// session.resume().await?;
///
/// let stats = session.wait().await?;
/// println!("delivered {} frames", stats.frames_delivered);
/// ```
///
/// [`OpusCastBuilder::start()`]: crate::OpusCastBuilder::start
pub struct Session {
    state: Arc<SessionState>,
    decode_cmd_tx: mpsc::Sender<DecodeCommand>,
    decode_handle: Option<JoinHandle<()>>,
    encode_handle: Option<JoinHandle<()>>,
    pacer_handle: Option<JoinHandle<()>>,
    deliver_handle: Option<JoinHandle<()>>,
    event_callback: Option<EventCallback>,
    control: tokio::sync::Mutex<()>,
    seekable: bool,
    source_description: String,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        state: Arc<SessionState>,
        decode_cmd_tx: mpsc::Sender<DecodeCommand>,
        decode_handle: JoinHandle<()>,
        encode_handle: JoinHandle<()>,
        pacer_handle: JoinHandle<()>,
        deliver_handle: JoinHandle<()>,
        event_callback: Option<EventCallback>,
        seekable: bool,
        source_description: String,
    ) -> Self {
        Self {
            state,
            decode_cmd_tx,
            decode_handle: Some(decode_handle),
            encode_handle: Some(encode_handle),
            pacer_handle: Some(pacer_handle),
            deliver_handle: Some(deliver_handle),
            event_callback,
            control: tokio::sync::Mutex::new(()),
            seekable,
            source_description,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PlaybackState {
        self.state.playback_state()
    }

    /// Returns `true` while the session can still deliver frames.
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Returns `true` if the source supports seeking.
    pub fn seekable(&self) -> bool {
        self.seekable
    }

    /// Current playback position within the source.
    ///
    /// Advances once per delivered audio frame; silence filler does not
    /// move the position.
    pub fn position(&self) -> Duration {
        Duration::from_millis(self.state.position_ms.load(Ordering::SeqCst))
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> SessionStats {
        self.state.stats()
    }

    /// Suspends frame delivery at the next tick boundary.
    ///
    /// The decoder keeps its position; nothing is discarded. Calling
    /// `pause` while already paused is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidState`] unless the session is
    /// playing or paused.
    pub async fn pause(&self) -> Result<(), StreamError> {
        let _guard = self.control.lock().await;
        match self.state.playback_state() {
            PlaybackState::Playing => {
                if self.state.transition(PlaybackState::Playing, PlaybackState::Paused) {
                    self.emit(StreamEvent::Paused);
                    Ok(())
                } else {
                    Err(StreamError::InvalidState {
                        operation: "pause".to_string(),
                        state: self.state.playback_state(),
                    })
                }
            }
            PlaybackState::Paused => Ok(()),
            state => Err(StreamError::InvalidState {
                operation: "pause".to_string(),
                state,
            }),
        }
    }

    /// Resumes a paused session.
    ///
    /// The delivery clock is re-based so the missed ticks of the paused
    /// interval are not burst through. Calling `resume` while already
    /// playing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidState`] unless the session is
    /// paused or playing.
    pub async fn resume(&self) -> Result<(), StreamError> {
        let _guard = self.control.lock().await;
        match self.state.playback_state() {
            PlaybackState::Paused => {
                if self.state.transition(PlaybackState::Paused, PlaybackState::Playing) {
                    self.emit(StreamEvent::Resumed);
                    Ok(())
                } else {
                    Err(StreamError::InvalidState {
                        operation: "resume".to_string(),
                        state: self.state.playback_state(),
                    })
                }
            }
            PlaybackState::Playing => Ok(()),
            state => Err(StreamError::InvalidState {
                operation: "resume".to_string(),
                state,
            }),
        }
    }

    /// Restarts playback from the given position.
    ///
    /// The decoder is reopened at the target position and all in-flight
    /// audio from before the seek is discarded; the delivered frame
    /// sequence restarts at 0. The source keeps playing (or stays
    /// paused) across the seek.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::SeekUnsupported`] for sources that cannot
    /// be repositioned, and [`StreamError::InvalidState`] unless the
    /// session is playing or paused.
    pub async fn seek(&self, position: Duration) -> Result<(), StreamError> {
        let _guard = self.control.lock().await;
        if !self.seekable {
            return Err(StreamError::SeekUnsupported {
                description: self.source_description.clone(),
            });
        }
        let current = self.state.playback_state();
        if !matches!(current, PlaybackState::Playing | PlaybackState::Paused) {
            return Err(StreamError::InvalidState {
                operation: "seek".to_string(),
                state: current,
            });
        }

        let epoch = self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .position_ms
            .store(position.as_millis() as u64, Ordering::SeqCst);

        self.decode_cmd_tx
            .send(DecodeCommand::Seek { position, epoch })
            .await
            .map_err(|_| StreamError::InvalidState {
                operation: "seek".to_string(),
                state: self.state.playback_state(),
            })
    }

    /// Gracefully stops the session.
    ///
    /// This will:
    /// 1. Stop the decoder subprocess
    /// 2. Let in-flight frames drain to the sink
    /// 3. Call `on_stop()` on the sink
    /// 4. Wait for background tasks to complete
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the session had already failed.
    pub async fn stop(mut self) -> Result<SessionStats, StreamError> {
        self.state.begin_stopping();
        self.state.running.store(false, Ordering::SeqCst);
        let _ = self.decode_cmd_tx.try_send(DecodeCommand::Stop);

        self.join_workers().await;
        self.conclude()
    }

    /// Runs the session to the natural end of the source.
    ///
    /// Resolves once the final frame has been delivered and the sink
    /// stopped, or when a fatal error ends the session early.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session, if any.
    pub async fn wait(mut self) -> Result<SessionStats, StreamError> {
        self.join_workers().await;
        self.conclude()
    }

    async fn join_workers(&mut self) {
        // Joined in pipeline order; each stage closes the next stage's
        // input channel on exit
        for handle in [
            self.decode_handle.take(),
            self.encode_handle.take(),
            self.pacer_handle.take(),
            self.deliver_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.await;
        }
    }

    fn conclude(&mut self) -> Result<SessionStats, StreamError> {
        match self.state.take_error() {
            Some(error) => Err(error),
            None => Ok(self.state.stats()),
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.running.load(Ordering::SeqCst) {
            // Session dropped without explicit stop() - trigger background cleanup
            self.state.running.store(false, Ordering::SeqCst);
            let _ = self.decode_cmd_tx.try_send(DecodeCommand::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_new() {
        let state = SessionState::new();
        assert!(state.running.load(Ordering::SeqCst));
        assert_eq!(state.playback_state(), PlaybackState::Idle);
        assert_eq!(state.frames_delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_playback_state_roundtrip() {
        for state in [
            PlaybackState::Idle,
            PlaybackState::Starting,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopping,
            PlaybackState::Ended,
        ] {
            assert_eq!(PlaybackState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_playback_state_display() {
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
        assert_eq!(PlaybackState::Ended.to_string(), "ended");
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let state = SessionState::new();
        assert!(state.transition(PlaybackState::Idle, PlaybackState::Starting));
        assert!(!state.transition(PlaybackState::Idle, PlaybackState::Starting));
        assert_eq!(state.playback_state(), PlaybackState::Starting);
    }

    #[test]
    fn test_begin_stopping_respects_terminal_state() {
        let state = SessionState::new();
        state.state.store(PlaybackState::Playing as u8, Ordering::SeqCst);
        state.begin_stopping();
        assert_eq!(state.playback_state(), PlaybackState::Stopping);

        state.state.store(PlaybackState::Ended as u8, Ordering::SeqCst);
        state.begin_stopping();
        assert_eq!(state.playback_state(), PlaybackState::Ended);
    }

    #[test]
    fn test_finish_happens_once() {
        let state = SessionState::new();
        state.state.store(PlaybackState::Playing as u8, Ordering::SeqCst);

        assert!(state.finish());
        assert!(!state.finish());
        assert_eq!(state.playback_state(), PlaybackState::Ended);
        assert!(!state.running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_first_error_wins() {
        let state = SessionState::new();
        state.store_error(StreamError::NoSourceConfigured);
        state.store_error(StreamError::NoSinkConfigured);

        let err = state.take_error().unwrap();
        assert!(matches!(err, StreamError::NoSourceConfigured));
        assert!(state.take_error().is_none());
    }

    #[test]
    fn test_decode_error_marked_partial_after_delivery() {
        let state = SessionState::new();
        state.frames_delivered.store(10, Ordering::SeqCst);
        state.store_error(StreamError::Decode {
            message: "pipe broke".to_string(),
            partial: false,
        });

        match state.take_error().unwrap() {
            StreamError::Decode { partial, .. } => assert!(partial),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stats_snapshot() {
        let state = SessionState::new();
        state.frames_delivered.store(50, Ordering::SeqCst);
        state.underruns.store(3, Ordering::SeqCst);
        state.position_ms.store(1000, Ordering::SeqCst);

        let stats = state.stats();
        assert_eq!(stats.frames_delivered, 50);
        assert_eq!(stats.underruns, 3);
        assert_eq!(stats.position, Duration::from_secs(1));
    }

    #[test]
    fn test_session_stats_default() {
        let stats = SessionStats::default();
        assert_eq!(stats.frames_delivered, 0);
        assert_eq!(stats.underruns, 0);
        assert_eq!(stats.position, Duration::ZERO);
    }
}
