//! Integration tests for opuscast.
//!
//! These drive the full pipeline through the public builder API with
//! `MockSource`, so no transcoder binary is needed. Timing-sensitive
//! tests run under tokio's paused clock for determinism. The one test
//! that spawns real ffmpeg is marked `#[ignore]` and should be run
//! manually.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use opuscast::{
    AuthToken, ChannelSink, FrameSink, MockSource, OpusCast, OpusFrame, SinkContext, SinkError,
    StreamError, StreamEvent,
};
use tokio::sync::mpsc;

/// A test sink that records every frame and lifecycle call.
struct RecordingSink {
    frames: Arc<Mutex<Vec<OpusFrame>>>,
    stopped: Arc<AtomicBool>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError> {
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A test sink that refuses every frame.
struct FailingSink;

#[async_trait]
impl FrameSink for FailingSink {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn send(&self, _frame: &OpusFrame) -> Result<(), SinkError> {
        Err(SinkError::custom("connection reset"))
    }
}

/// A test sink that captures the token it was started with.
struct TokenProbeSink {
    token: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl FrameSink for TokenProbeSink {
    fn name(&self) -> &str {
        "probe"
    }

    async fn on_start(&self, ctx: &SinkContext) -> Result<(), SinkError> {
        *self.token.lock().unwrap() = ctx.token().map(|t| t.reveal().to_string());
        Ok(())
    }

    async fn send(&self, _frame: &OpusFrame) -> Result<(), SinkError> {
        Ok(())
    }
}

fn sine_source(duration_ms: u64) -> MockSource {
    let mut mock = MockSource::new(48000, 2);
    mock.generate_sine(440.0, duration_ms);
    mock
}

fn event_recorder() -> (
    Arc<Mutex<Vec<StreamEvent>>>,
    impl Fn(StreamEvent) + Send + Sync + 'static,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&events);
    (events, move |event| log.lock().unwrap().push(event))
}

/// Collects everything the sink received. Call after the session has
/// ended so the sender side is dropped and the channel terminates.
async fn drain(mut rx: mpsc::Receiver<OpusFrame>) -> Vec<OpusFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

#[tokio::test(start_paused = true)]
async fn test_one_second_stream_delivers_fifty_frames() {
    let (tx, rx) = mpsc::channel(64);
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(sine_source(1000))
        .sink(ChannelSink::new(tx))
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    // 1s of audio at 20ms per frame
    assert_eq!(frames.len(), 50);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq, i as u64);
        assert_eq!(frame.epoch, 0);
        assert!(!frame.is_silence);
        assert!(!frame.payload.is_empty());
    }
    assert!(frames[49].is_final);

    assert_eq!(stats.frames_delivered, 50);
    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.position, Duration::from_secs(1));
    assert!(stats.bytes_delivered > 0);

    let events = events.lock().unwrap();
    assert!(matches!(
        events.first(),
        Some(StreamEvent::DecoderStarted { .. })
    ));
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Started)));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Ended { error: None })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_partial_tail_frame_is_padded() {
    let (tx, rx) = mpsc::channel(64);

    let session = OpusCast::builder()
        .mock_source(sine_source(990))
        .sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    // 990ms does not land on a frame boundary; the tail is zero-padded
    // so the stream still ends on a full 20ms frame.
    assert_eq!(frames.len(), 50);
    assert!(frames[49].is_final);
    assert!(!frames[49].is_silence);
    assert_eq!(stats.position, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_source_is_concealed_with_silence() {
    let (tx, rx) = mpsc::channel(64);
    let (events, on_event) = event_recorder();

    // 100ms of audio with a 90ms stall before the third block. The
    // encoder holds one frame back, so the pacer runs dry one tick in.
    let mut mock = sine_source(100);
    mock.stall_before_block(2, Duration::from_millis(90));

    let session = OpusCast::builder()
        .mock_source(mock)
        .sink(ChannelSink::new(tx))
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    // Ticks 1 through 4 fire during the stall: four silence frames
    // between the first real frame and the remaining four.
    assert_eq!(frames.len(), 9);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq, i as u64);
    }
    let silence: Vec<bool> = frames.iter().map(|f| f.is_silence).collect();
    assert_eq!(
        silence,
        vec![false, true, true, true, true, false, false, false, false]
    );
    assert!(frames[8].is_final);

    assert_eq!(stats.underruns, 4);
    assert_eq!(stats.frames_delivered, 9);
    // silence holds the cadence but does not advance the position
    assert_eq!(stats.position, Duration::from_millis(100));

    let underrun_events = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StreamEvent::Underrun { .. }))
        .count();
    assert_eq!(underrun_events, 4);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_sink_fails_the_session() {
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(sine_source(200))
        .sink(FailingSink)
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    let err = session.wait().await.unwrap_err();
    match err {
        StreamError::Transport {
            sink_name,
            attempts,
            ..
        } => {
            assert_eq!(sink_name, "flaky");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected transport error, got {other}"),
    }

    let events = events.lock().unwrap();
    let sink_errors = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::SinkError { .. }))
        .count();
    assert_eq!(sink_errors, 3);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Ended { error: Some(_) })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_keeps_sequence_gapless() {
    let (tx, rx) = mpsc::channel(64);
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(sine_source(400))
        .sink(ChannelSink::new(tx))
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    // let a few frames flow, then pause across ten tick intervals
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.pause().await.unwrap();
    session.pause().await.unwrap(); // pausing twice is fine
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.resume().await.unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    // nothing was dropped and no silence was injected while paused
    assert_eq!(frames.len(), 20);
    assert!(frames.iter().all(|f| !f.is_silence));
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.seq, i as u64);
    }
    assert_eq!(stats.underruns, 0);

    let events = events.lock().unwrap();
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Paused))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Resumed))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_seek_restarts_the_wire_sequence() {
    let (tx, rx) = mpsc::channel(64);
    let (events, on_event) = event_recorder();

    let mut mock = sine_source(200);
    mock.set_seekable(true);

    let session = OpusCast::builder()
        .mock_source(mock)
        .sink(ChannelSink::new(tx))
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    session.seek(Duration::from_millis(100)).await.unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    // two frames from the old position, then the sequence restarts at
    // zero for the five frames that remain past the seek target
    assert_eq!(frames.len(), 7);
    assert_eq!((frames[0].seq, frames[0].epoch), (0, 0));
    assert_eq!((frames[1].seq, frames[1].epoch), (1, 0));
    for (i, frame) in frames[2..].iter().enumerate() {
        assert_eq!(frame.seq, i as u64);
        assert_eq!(frame.epoch, 1);
        assert!(!frame.is_silence);
    }
    assert!(frames[6].is_final);

    assert_eq!(stats.underruns, 0);
    assert_eq!(stats.position, Duration::from_millis(200));

    let events = events.lock().unwrap();
    assert!(events.iter().any(
        |e| matches!(e, StreamEvent::Seeked { position } if *position == Duration::from_millis(100))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_stream_flushes_the_sink() {
    let sink = RecordingSink::new();
    let received = Arc::clone(&sink.frames);
    let stopped = Arc::clone(&sink.stopped);
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(sine_source(10_000))
        .sink(sink)
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(90)).await;
    let stats = session.stop().await.unwrap();

    // ticks 0 through 80 fired before the stop landed
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 5);
    assert!(!received[4].is_final);
    assert_eq!(stats.frames_delivered, 5);

    assert!(stopped.load(Ordering::SeqCst));
    let events = events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Ended { error: None })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_session_shuts_down() {
    let sink = RecordingSink::new();
    let received = Arc::clone(&sink.frames);
    let stopped = Arc::clone(&sink.stopped);
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(sine_source(10_000))
        .sink(sink)
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(session);

    // Give the detached workers time to notice and wind down
    tokio::time::sleep(Duration::from_millis(200)).await;

    // ticks 0 through 40 fired before the drop
    assert_eq!(received.lock().unwrap().len(), 3);
    assert!(stopped.load(Ordering::SeqCst));
    let events = events.lock().unwrap();
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Ended { error: None })
    ));
}

#[tokio::test]
async fn test_empty_source_ends_cleanly() {
    let (tx, rx) = mpsc::channel(8);
    let (events, on_event) = event_recorder();

    let session = OpusCast::builder()
        .mock_source(MockSource::new(48000, 2))
        .sink(ChannelSink::new(tx))
        .on_event(on_event)
        .start()
        .await
        .unwrap();

    let stats = session.wait().await.unwrap();
    let frames = drain(rx).await;

    assert!(frames.is_empty());
    assert_eq!(stats.frames_delivered, 0);

    let events = events.lock().unwrap();
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Started)));
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Ended { error: None })
    ));
}

#[tokio::test]
async fn test_token_reaches_the_sink_on_start() {
    let token = Arc::new(Mutex::new(None));
    let sink = TokenProbeSink {
        token: Arc::clone(&token),
    };

    let session = OpusCast::builder()
        .mock_source(MockSource::new(48000, 2))
        .sink(sink)
        .token(AuthToken::new("tok-secret-1"))
        .start()
        .await
        .unwrap();
    session.wait().await.unwrap();

    assert_eq!(token.lock().unwrap().as_deref(), Some("tok-secret-1"));
}

#[tokio::test]
async fn test_token_resolved_from_environment() {
    std::env::set_var("OPUSCAST_IT_TOKEN", "tok-from-env");

    let token = Arc::new(Mutex::new(None));
    let sink = TokenProbeSink {
        token: Arc::clone(&token),
    };

    let session = OpusCast::builder()
        .mock_source(MockSource::new(48000, 2))
        .sink(sink)
        .token_from_env("OPUSCAST_IT_TOKEN")
        .start()
        .await
        .unwrap();
    session.wait().await.unwrap();

    assert_eq!(token.lock().unwrap().as_deref(), Some("tok-from-env"));
    std::env::remove_var("OPUSCAST_IT_TOKEN");
}

/// Streams a real file through ffmpeg. Requires the binary on PATH and
/// an input file named by `OPUSCAST_TEST_INPUT`.
#[tokio::test]
#[ignore = "requires ffmpeg and a local media file"]
async fn test_real_transcoder_playback() {
    use opuscast::FfmpegSource;

    let input =
        std::env::var("OPUSCAST_TEST_INPUT").expect("set OPUSCAST_TEST_INPUT to an audio file");
    let (tx, mut rx) = mpsc::channel(64);

    let session = OpusCast::builder()
        .source(FfmpegSource::new(input))
        .sink(ChannelSink::new(tx))
        .start()
        .await
        .expect("failed to start stream");

    // one second of real-time delivery
    let mut received = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(_)) => received += 1,
            _ => break,
        }
    }

    session.stop().await.expect("failed to stop stream");
    println!("received {received} frames in 1s");
    assert!(
        received >= 45,
        "expected near-real-time cadence, got {received}"
    );
}
