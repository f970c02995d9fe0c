//! Pacer: releases exactly one frame per tick of the delivery clock.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::frame::OpusFrame;
use crate::session::{PlaybackState, SessionState};
use crate::{EventCallback, StreamEvent};

/// What the frame queue held at a delivery deadline.
enum Pull {
    Frame(OpusFrame),
    Empty,
    Closed,
}

/// Meters encoded frames out on an absolute schedule.
///
/// The clock starts when the first frame is ready, and every later
/// deadline is computed from that base, so scheduling jitter never
/// accumulates. When a deadline arrives with nothing in the queue, a
/// silence frame keeps the cadence; the wire sequence it consumes keeps
/// the delivered stream gapless. Pauses and seeks re-base the clock.
pub(crate) struct Pacer {
    frame_rx: mpsc::Receiver<OpusFrame>,
    deliver_tx: mpsc::Sender<OpusFrame>,
    state: Arc<SessionState>,
    event_callback: Option<EventCallback>,
    tick: Duration,
    epoch: u32,
    out_seq: u64,
}

impl Pacer {
    pub fn new(
        frame_rx: mpsc::Receiver<OpusFrame>,
        deliver_tx: mpsc::Sender<OpusFrame>,
        state: Arc<SessionState>,
        event_callback: Option<EventCallback>,
        tick: Duration,
    ) -> Self {
        Self {
            frame_rx,
            deliver_tx,
            state,
            event_callback,
            tick,
            epoch: 0,
            out_seq: 0,
        }
    }

    pub async fn run(mut self) {
        let mut base = Instant::now();
        let mut ticks: u32 = 0;
        let mut started = false;

        loop {
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }
            if started && self.state.playback_state() == PlaybackState::Paused {
                if !self.park_while_paused().await {
                    break;
                }
                base = Instant::now();
                ticks = 0;
                continue;
            }

            let seek_pending = started && self.state.epoch.load(Ordering::SeqCst) != self.epoch;
            if !started || seek_pending {
                // no clock yet, or a seek gap: block for the next fresh
                // frame instead of padding with silence
                let Some(frame) = self.next_fresh_frame().await else {
                    break;
                };
                self.epoch = frame.epoch;
                if seek_pending {
                    self.out_seq = 0;
                }
                if !started {
                    started = true;
                    if self
                        .state
                        .transition(PlaybackState::Starting, PlaybackState::Playing)
                    {
                        self.emit(StreamEvent::Started);
                    }
                }
                base = Instant::now();
                ticks = 0;
                let last = frame.is_final;
                if !self.deliver(frame).await || last {
                    break;
                }
                ticks = 1;
                continue;
            }

            tokio::time::sleep_until(base + self.tick * ticks).await;
            if !self.state.running.load(Ordering::SeqCst) {
                break;
            }
            if self.state.playback_state() == PlaybackState::Paused
                || self.state.epoch.load(Ordering::SeqCst) != self.epoch
            {
                continue;
            }

            let frame = match self.pull_ready() {
                Pull::Frame(frame) => {
                    if frame.epoch != self.epoch {
                        // first frame of a new cut arrived between checks
                        self.epoch = frame.epoch;
                        self.out_seq = 0;
                        base = Instant::now();
                        ticks = 0;
                    }
                    frame
                }
                Pull::Empty => {
                    let total = self.state.underruns.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(
                        "no frame ready at tick {}, sending silence ({} underruns total)",
                        ticks,
                        total
                    );
                    self.emit(StreamEvent::Underrun {
                        seq: self.out_seq,
                        total,
                    });
                    OpusFrame::silence(self.out_seq, self.epoch)
                }
                Pull::Closed => break,
            };

            let last = frame.is_final;
            if !self.deliver(frame).await || last {
                break;
            }
            ticks += 1;
        }

        tracing::debug!(
            "pacer stopped at seq {} (epoch {})",
            self.out_seq,
            self.epoch
        );
    }

    /// Blocks until a frame of the current (or newer) epoch arrives.
    async fn next_fresh_frame(&mut self) -> Option<OpusFrame> {
        loop {
            let frame = self.frame_rx.recv().await?;
            if frame.epoch < self.state.epoch.load(Ordering::SeqCst) {
                continue;
            }
            return Some(frame);
        }
    }

    /// Non-blocking pull, discarding frames from before a seek.
    fn pull_ready(&mut self) -> Pull {
        loop {
            match self.frame_rx.try_recv() {
                Ok(frame) => {
                    if frame.epoch < self.state.epoch.load(Ordering::SeqCst) {
                        continue;
                    }
                    return Pull::Frame(frame);
                }
                Err(TryRecvError::Empty) => return Pull::Empty,
                Err(TryRecvError::Disconnected) => return Pull::Closed,
            }
        }
    }

    /// Polls the lifecycle state at tick granularity until the session
    /// leaves `Paused`. Returns `false` when the session shut down.
    async fn park_while_paused(&self) -> bool {
        while self.state.playback_state() == PlaybackState::Paused {
            if !self.state.running.load(Ordering::SeqCst) {
                return false;
            }
            tokio::time::sleep(self.tick).await;
        }
        self.state.running.load(Ordering::SeqCst)
    }

    /// Stamps the wire sequence and hands the frame to delivery.
    async fn deliver(&mut self, mut frame: OpusFrame) -> bool {
        frame.seq = self.out_seq;
        if self.deliver_tx.send(frame).await.is_err() {
            return false;
        }
        self.out_seq += 1;
        true
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

/// Spawns the pacer on the current runtime.
pub(crate) fn spawn_pacer(pacer: Pacer) -> JoinHandle<()> {
    tokio::spawn(pacer.run())
}
