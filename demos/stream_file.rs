//! File streaming example.
//!
//! Streams a media file through ffmpeg and delivers Opus frames to a
//! channel at real-time cadence.
//!
//! Run with: cargo run --example stream_file -- path/to/audio.mp3

use opuscast::{ChannelSink, FfmpegSource, OpusCast, StreamEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let input = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "input.mp3".to_string());
    println!("Streaming {input} at real-time cadence...");

    let (tx, mut rx) = mpsc::channel(32);

    let session = OpusCast::builder()
        .source(FfmpegSource::new(input))
        .sink(ChannelSink::new(tx))
        .on_event(|event| match event {
            StreamEvent::Underrun { seq, total } => {
                eprintln!("Warning: silence at seq {seq} ({total} underruns so far)");
            }
            StreamEvent::SinkError {
                sink_name,
                error,
                attempt,
            } => {
                eprintln!("Sink '{sink_name}' error (attempt {attempt}): {error}");
            }
            _ => {}
        })
        .start()
        .await?;

    // Consume frames as they arrive, one per 20ms tick
    let counter = tokio::spawn(async move {
        let mut frames = 0u64;
        let mut bytes = 0u64;
        while let Some(frame) = rx.recv().await {
            frames += 1;
            bytes += frame.payload.len() as u64;
            if frames % 50 == 0 {
                println!("{frames} frames ({bytes} bytes) delivered");
            }
        }
        (frames, bytes)
    });

    let stats = session.wait().await?;
    let (frames, bytes) = counter.await?;

    println!("\nStream complete!");
    println!("  Frames on the wire: {frames}");
    println!("  Bytes on the wire: {bytes}");
    println!("  Underruns: {}", stats.underruns);
    println!("  Final position: {:?}", stats.position);

    Ok(())
}
