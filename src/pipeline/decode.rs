//! Decode worker: drives the PCM source.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chunk::PcmChunk;
use crate::session::SessionState;
use crate::source::PcmSource;
use crate::{EventCallback, StreamConfig, StreamError, StreamEvent};

/// Control commands accepted by the decode worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodeCommand {
    /// Restart the source at the given position under a new epoch.
    Seek { position: Duration, epoch: u32 },
    /// Shut the source down and exit.
    Stop,
}

/// Pulls PCM blocks from the source and forwards them as stamped chunks.
///
/// The worker owns the source for its whole life. Commands interrupt a
/// blocked forward, so a seek goes through even when the chunk queue is
/// full (for example while playback is paused).
pub(crate) struct DecodeWorker {
    source: Box<dyn PcmSource>,
    config: StreamConfig,
    state: Arc<SessionState>,
    chunk_tx: mpsc::Sender<PcmChunk>,
    cmd_rx: mpsc::Receiver<DecodeCommand>,
    event_callback: Option<EventCallback>,
    start_position: Duration,
    seq: u64,
    epoch: u32,
}

impl DecodeWorker {
    pub fn new(
        source: Box<dyn PcmSource>,
        config: StreamConfig,
        state: Arc<SessionState>,
        chunk_tx: mpsc::Sender<PcmChunk>,
        cmd_rx: mpsc::Receiver<DecodeCommand>,
        event_callback: Option<EventCallback>,
        start_position: Duration,
    ) -> Self {
        tracing::debug!("decode worker created for '{}'", source.description());
        Self {
            source,
            config,
            state,
            chunk_tx,
            cmd_rx,
            event_callback,
            start_position,
            seq: 0,
            epoch: 0,
        }
    }

    pub async fn run(mut self) {
        let first = match self.start_source().await {
            Ok(block) => block,
            Err(error) => {
                self.source.stop().await;
                self.fail(error);
                return;
            }
        };
        self.emit(StreamEvent::DecoderStarted {
            description: self.source.description(),
        });

        let mut pending = first.map(|samples| self.stamp(samples));
        if pending.is_none() {
            // the source produced nothing at all
            let marker = self.end_marker();
            let _ = self.chunk_tx.send(marker).await;
            self.source.stop().await;
            tracing::debug!("decode worker: source was empty");
            return;
        }

        while self.state.running.load(Ordering::SeqCst) {
            if let Some(chunk) = pending.take() {
                // reserve through a clone so the permit's borrow doesn't
                // overlap the `&mut self` taken by the command branch
                let chunk_tx = self.chunk_tx.clone();
                tokio::select! {
                    cmd = self.cmd_rx.recv() => {
                        // the un-forwarded chunk is dropped with its epoch
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    permit = chunk_tx.reserve() => {
                        match permit {
                            Ok(permit) => permit.send(chunk),
                            Err(_) => break,
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                block = self.source.read_block() => {
                    match block {
                        Ok(Some(samples)) => {
                            pending = Some(self.stamp(samples));
                        }
                        Ok(None) => {
                            let marker = self.end_marker();
                            let _ = self.chunk_tx.send(marker).await;
                            break;
                        }
                        Err(error) => {
                            self.fail(error);
                            break;
                        }
                    }
                }
            }
        }

        self.source.stop().await;
        tracing::debug!(
            "decode worker stopped after {} chunk(s)",
            self.state.chunks_decoded.load(Ordering::SeqCst)
        );
    }

    /// Opens the source and waits for its first PCM block.
    ///
    /// Both steps together must finish within the configured start
    /// timeout; a transcoder that spawns but never produces output is
    /// treated the same as one that fails to spawn.
    async fn start_source(&mut self) -> Result<Option<Vec<i16>>, StreamError> {
        let description = self.source.description();
        let started = tokio::time::timeout(self.config.start_timeout, async {
            self.source.start(&self.config, self.start_position).await?;
            self.source.read_block().await
        })
        .await;
        match started {
            Ok(result) => result,
            Err(_) => Err(StreamError::Decode {
                message: format!(
                    "source '{}' produced no audio within {:?}",
                    description, self.config.start_timeout
                ),
                partial: false,
            }),
        }
    }

    /// Returns `false` when the worker should exit.
    async fn handle_command(&mut self, cmd: Option<DecodeCommand>) -> bool {
        match cmd {
            Some(DecodeCommand::Seek { position, epoch }) => {
                match self.source.restart_at(position).await {
                    Ok(()) => {
                        self.epoch = epoch;
                        self.seq = 0;
                        tracing::info!("decoder repositioned to {:?} (epoch {})", position, epoch);
                        self.emit(StreamEvent::Seeked { position });
                        true
                    }
                    Err(error) => {
                        self.fail(error);
                        false
                    }
                }
            }
            Some(DecodeCommand::Stop) | None => false,
        }
    }

    fn stamp(&mut self, samples: Vec<i16>) -> PcmChunk {
        let chunk = PcmChunk::new(
            samples,
            self.seq,
            self.epoch,
            self.config.sample_rate,
            self.config.channels,
        );
        self.seq += 1;
        self.state.chunks_decoded.fetch_add(1, Ordering::SeqCst);
        chunk
    }

    fn end_marker(&mut self) -> PcmChunk {
        let marker = PcmChunk::end_of_stream(
            self.seq,
            self.epoch,
            self.config.sample_rate,
            self.config.channels,
        );
        self.seq += 1;
        marker
    }

    fn fail(&self, error: StreamError) {
        tracing::error!("decode worker failed: {}", error);
        self.state.store_error(error);
        self.state.running.store(false, Ordering::SeqCst);
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Spawns the decode worker on the current runtime.
pub(crate) fn spawn_decode_worker(worker: DecodeWorker) -> JoinHandle<()> {
    tokio::spawn(worker.run())
}
