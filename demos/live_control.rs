//! Live control example.
//!
//! Starts a stream from a synthetic source and drives it through
//! pause, resume, and seek while frames are being delivered.
//!
//! Run with: cargo run --example live_control

use std::time::Duration;

use opuscast::{ChannelSink, MockSource, OpusCast, StreamEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Ten seconds of tone, seekable like a real file
    let mut source = MockSource::new(48000, 2);
    source.generate_sine(440.0, 10_000);
    source.set_seekable(true);

    let (tx, mut rx) = mpsc::channel(32);

    let session = OpusCast::builder()
        .mock_source(source)
        .sink(ChannelSink::new(tx))
        .on_event(|event| match event {
            StreamEvent::Started => println!("event: playing"),
            StreamEvent::Paused => println!("event: paused"),
            StreamEvent::Resumed => println!("event: resumed"),
            StreamEvent::Seeked { position } => println!("event: seeked to {position:?}"),
            StreamEvent::Ended { error } => match error {
                Some(e) => eprintln!("event: ended with error: {e}"),
                None => println!("event: ended"),
            },
            _ => {}
        })
        .start()
        .await?;

    let counter = tokio::spawn(async move {
        let mut count = 0u64;
        while rx.recv().await.is_some() {
            count += 1;
        }
        count
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("position: {:?}", session.position());

    session.pause().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.resume().await?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    session.seek(Duration::from_secs(8)).await?;

    let stats = session.wait().await?;
    let delivered = counter.await?;

    println!("\nStream complete!");
    println!("  Frames on the wire: {delivered}");
    println!("  Underruns: {}", stats.underruns);
    println!("  Final position: {:?}", stats.position);

    Ok(())
}
