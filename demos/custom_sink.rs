//! Custom sink example.
//!
//! Demonstrates how to implement the FrameSink trait for custom
//! delivery targets.
//!
//! Run with: cargo run --example custom_sink

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use opuscast::{FrameSink, MockSource, OpusCast, OpusFrame, SinkContext, SinkError};

/// A custom sink that tracks wire statistics in real time.
struct StatsSink {
    name: String,
    frames: AtomicU64,
    bytes: AtomicU64,
    silence: AtomicU64,
    largest: AtomicUsize,
}

impl StatsSink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            silence: AtomicU64::new(0),
            largest: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FrameSink for StatsSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self, ctx: &SinkContext) -> Result<(), SinkError> {
        println!(
            "[{}] Starting: {}Hz, {} channel(s), {} bps, one frame per {:?}",
            self.name, ctx.sample_rate, ctx.channels, ctx.bitrate, ctx.frame_duration
        );
        Ok(())
    }

    async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
        if frame.is_silence {
            self.silence.fetch_add(1, Ordering::Relaxed);
        }
        self.largest
            .fetch_max(frame.payload.len(), Ordering::Relaxed);
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        println!("[{}] Stopping. Final stats:", self.name);
        println!("  Frames: {}", self.frames.load(Ordering::Relaxed));
        println!("  Bytes: {}", self.bytes.load(Ordering::Relaxed));
        println!("  Silence frames: {}", self.silence.load(Ordering::Relaxed));
        println!(
            "  Largest payload: {} bytes",
            self.largest.load(Ordering::Relaxed)
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("Streaming three seconds of synthetic audio...");

    let mut source = MockSource::new(48000, 2);
    source.generate_sine(440.0, 3000);

    let session = OpusCast::builder()
        .mock_source(source)
        .sink(StatsSink::new("wire-stats"))
        .start()
        .await?;

    session.wait().await?;

    println!("\nDone!");

    Ok(())
}
