//! Encode worker: packs PCM chunks into Opus frames.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chunk::PcmChunk;
use crate::encoder::{EncodeOutput, FrameEncoder};
use crate::frame::OpusFrame;
use crate::session::SessionState;
use crate::{EventCallback, StreamError, StreamEvent};

/// Consumes PCM chunks and forwards encoded frames.
///
/// Frames are forwarded one behind production: the newest frame is held
/// back until its successor exists, so the true last frame can be marked
/// final even when the stream ends exactly on a frame boundary.
pub(crate) struct EncodeWorker {
    encoder: FrameEncoder,
    state: Arc<SessionState>,
    chunk_rx: mpsc::Receiver<PcmChunk>,
    frame_tx: mpsc::Sender<OpusFrame>,
    event_callback: Option<EventCallback>,
    max_skips: u64,
    epoch: u32,
    held: Option<OpusFrame>,
}

impl EncodeWorker {
    pub fn new(
        encoder: FrameEncoder,
        state: Arc<SessionState>,
        chunk_rx: mpsc::Receiver<PcmChunk>,
        frame_tx: mpsc::Sender<OpusFrame>,
        event_callback: Option<EventCallback>,
        max_skips: u64,
    ) -> Self {
        Self {
            encoder,
            state,
            chunk_rx,
            frame_tx,
            event_callback,
            max_skips,
            epoch: 0,
            held: None,
        }
    }

    pub async fn run(mut self) {
        while self.state.running.load(Ordering::SeqCst) {
            let Some(chunk) = self.chunk_rx.recv().await else {
                // decoder aborted without an end-of-stream marker
                break;
            };

            if chunk.epoch < self.state.epoch.load(Ordering::SeqCst) {
                // left over from before a seek
                continue;
            }
            if chunk.epoch > self.epoch {
                if !self.adopt_epoch(chunk.epoch) {
                    break;
                }
            }

            if chunk.end_of_stream {
                self.finish_stream().await;
                break;
            }

            self.encoder.push(&chunk);
            if !self.drain_ready().await {
                break;
            }
        }
        tracing::debug!(
            "encode worker stopped ({} frame(s) skipped)",
            self.encoder.skipped()
        );
    }

    /// Encodes everything buffered so far. Returns `false` when the
    /// worker should exit.
    async fn drain_ready(&mut self) -> bool {
        loop {
            match self.encoder.poll() {
                EncodeOutput::NeedMoreInput => return true,
                EncodeOutput::Frame(frame) => {
                    if !self.forward(frame).await {
                        return false;
                    }
                }
                EncodeOutput::Skipped { seq, message } => {
                    if !self.record_skip(seq, message) {
                        return false;
                    }
                }
            }
        }
    }

    /// Pads and encodes the tail, then releases the held frame as final.
    async fn finish_stream(&mut self) {
        match self.encoder.finish() {
            Some(EncodeOutput::Frame(frame)) => {
                if !self.forward(frame).await {
                    return;
                }
            }
            Some(EncodeOutput::Skipped { seq, message }) => {
                let _ = self.record_skip(seq, message);
            }
            Some(EncodeOutput::NeedMoreInput) | None => {}
        }
        if let Some(mut last) = self.held.take() {
            last.is_final = true;
            let _ = self.frame_tx.send(last).await;
        }
    }

    /// Holds `frame` and forwards its predecessor.
    async fn forward(&mut self, frame: OpusFrame) -> bool {
        if let Some(ready) = self.held.replace(frame) {
            if self.frame_tx.send(ready).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Rebuilds the encoder for a new epoch, dropping held output.
    fn adopt_epoch(&mut self, epoch: u32) -> bool {
        if let Err(error) = self.encoder.reset(epoch) {
            self.fail(error);
            return false;
        }
        self.held = None;
        self.epoch = epoch;
        tracing::debug!("encoder reset for epoch {}", epoch);
        true
    }

    /// Returns `false` once the skip budget is exhausted.
    fn record_skip(&mut self, seq: u64, message: String) -> bool {
        let skipped = self.state.frames_skipped.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!("frame {} skipped: {} ({} total)", seq, message, skipped);
        self.emit(StreamEvent::FrameSkipped {
            seq,
            error: message.clone(),
            skipped,
        });
        if skipped >= self.max_skips {
            self.fail(StreamError::Encode {
                message: format!("giving up after {skipped} failed frame(s): {message}"),
                skipped,
            });
            return false;
        }
        true
    }

    fn fail(&self, error: StreamError) {
        tracing::error!("encode worker failed: {}", error);
        self.state.store_error(error);
        self.state.running.store(false, Ordering::SeqCst);
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Spawns the encode worker on the current runtime.
pub(crate) fn spawn_encode_worker(worker: EncodeWorker) -> JoinHandle<()> {
    tokio::spawn(worker.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamConfig;

    fn worker_for(
        config: &StreamConfig,
    ) -> (
        EncodeWorker,
        Arc<SessionState>,
        mpsc::Sender<PcmChunk>,
        mpsc::Receiver<OpusFrame>,
    ) {
        let state = Arc::new(SessionState::new());
        let (chunk_tx, chunk_rx) = mpsc::channel(4);
        // deep enough that tests can send first and drain afterwards
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let encoder = FrameEncoder::new(config).unwrap();
        let worker = EncodeWorker::new(
            encoder,
            state.clone(),
            chunk_rx,
            frame_tx,
            None,
            config.max_encode_skips,
        );
        (worker, state, chunk_tx, frame_rx)
    }

    fn chunk_of(samples: usize, seq: u64, epoch: u32) -> PcmChunk {
        PcmChunk::new(vec![0i16; samples], seq, epoch, 48000, 2)
    }

    #[tokio::test]
    async fn test_encode_marks_last_frame_final() {
        let config = StreamConfig::default();
        let (worker, _state, chunk_tx, mut frame_rx) = worker_for(&config);
        let handle = tokio::spawn(worker.run());

        // 1.5 frames of audio, then end of stream
        chunk_tx.send(chunk_of(2880, 0, 0)).await.unwrap();
        chunk_tx
            .send(PcmChunk::end_of_stream(1, 0, 48000, 2))
            .await
            .unwrap();
        drop(chunk_tx);

        let f0 = frame_rx.recv().await.unwrap();
        assert!(!f0.is_final);
        let f1 = frame_rx.recv().await.unwrap();
        assert!(f1.is_final);
        assert!(frame_rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_encode_final_on_exact_boundary() {
        let config = StreamConfig::default();
        let (worker, _state, chunk_tx, mut frame_rx) = worker_for(&config);
        let handle = tokio::spawn(worker.run());

        // exactly one frame, so no tail padding is needed
        chunk_tx.send(chunk_of(1920, 0, 0)).await.unwrap();
        chunk_tx
            .send(PcmChunk::end_of_stream(1, 0, 48000, 2))
            .await
            .unwrap();
        drop(chunk_tx);

        let only = frame_rx.recv().await.unwrap();
        assert!(only.is_final);
        assert!(frame_rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_encode_aborts_without_end_marker() {
        let config = StreamConfig::default();
        let (worker, _state, chunk_tx, mut frame_rx) = worker_for(&config);
        let handle = tokio::spawn(worker.run());

        chunk_tx.send(chunk_of(1920, 0, 0)).await.unwrap();
        drop(chunk_tx);

        // the single frame stays held back; an abort must not flush it
        assert!(frame_rx.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_encode_discards_stale_epochs() {
        let config = StreamConfig::default();
        let (worker, state, chunk_tx, mut frame_rx) = worker_for(&config);
        state.epoch.store(1, Ordering::SeqCst);
        let handle = tokio::spawn(worker.run());

        chunk_tx.send(chunk_of(1920, 5, 0)).await.unwrap();
        chunk_tx.send(chunk_of(1920, 0, 1)).await.unwrap();
        chunk_tx.send(chunk_of(1920, 1, 1)).await.unwrap();
        chunk_tx
            .send(PcmChunk::end_of_stream(2, 1, 48000, 2))
            .await
            .unwrap();
        drop(chunk_tx);

        let mut frames = Vec::new();
        while let Some(frame) = frame_rx.recv().await {
            frames.push(frame);
        }
        handle.await.unwrap();

        // only the two fresh chunks produced output
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.epoch == 1));
        assert!(frames.last().unwrap().is_final);
    }

    #[tokio::test]
    async fn test_encode_counts_chunks_into_frames() {
        let config = StreamConfig::default();
        let (worker, _state, chunk_tx, mut frame_rx) = worker_for(&config);
        let handle = tokio::spawn(worker.run());

        // one second of audio in uneven chunks
        let mut remaining = 96000usize;
        let mut seq = 0;
        while remaining > 0 {
            let take = remaining.min(2880);
            chunk_tx.send(chunk_of(take, seq, 0)).await.unwrap();
            seq += 1;
            remaining -= take;
        }
        chunk_tx
            .send(PcmChunk::end_of_stream(seq, 0, 48000, 2))
            .await
            .unwrap();
        drop(chunk_tx);

        let mut frames = Vec::new();
        while let Some(frame) = frame_rx.recv().await {
            frames.push(frame);
        }
        handle.await.unwrap();

        assert_eq!(frames.len(), 50);
        assert!(frames[..49].iter().all(|f| !f.is_final));
        assert!(frames[49].is_final);
    }
}
