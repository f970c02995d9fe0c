//! Builder pattern for `OpusCast`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::encoder::FrameEncoder;
use crate::pipeline::{
    spawn_decode_worker, spawn_deliver_worker, spawn_encode_worker, spawn_pacer, DecodeWorker,
    DeliverWorker, EncodeWorker, Pacer,
};
use crate::session::{PlaybackState, Session, SessionState};
use crate::sink::{FrameSink, SinkContext};
use crate::source::{MockSource, PcmSource};
use crate::{
    event_callback, AudioProfile, AuthToken, EventCallback, StreamConfig, StreamError, StreamEvent,
};

/// Channel capacity for PCM chunks flowing to the encoder.
/// One chunk is one frame's worth of samples, so this bounds decoder
/// read-ahead to a few frames.
const CHUNK_CHANNEL_CAPACITY: usize = 4;

/// Channel capacity for decoder commands.
/// Small; commands are rare (Stop and the occasional Seek).
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// Channel capacity between pacer and deliver worker.
/// Exactly one frame in flight keeps delivery on the pacer's clock.
const DELIVER_CHANNEL_CAPACITY: usize = 1;

/// Builder for configuring and starting a streaming session.
///
/// Use [`OpusCast::builder()`] to create a new builder.
///
/// # Example
///
/// ```ignore
/// use opuscast::{ChannelSink, FfmpegSource, OpusCast};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel(32);
///
/// let session = OpusCast::builder()
///     .source(FfmpegSource::new("track.flac"))
///     .sink(ChannelSink::new(tx))
///     .token_from_env("STREAM_TOKEN")
///     .start()
///     .await?;
/// ```
///
/// [`OpusCast::builder()`]: OpusCast::builder
#[must_use]
pub struct OpusCastBuilder {
    /// The PCM source to stream from.
    source: Option<Box<dyn PcmSource>>,
    /// The sink frames are delivered to.
    sink: Option<Box<dyn FrameSink>>,
    /// Token handed to the sink at startup.
    token: Option<AuthToken>,
    /// Environment variable to read the token from, resolved at start.
    token_env: Option<String>,
    /// Event callback.
    event_callback: Option<EventCallback>,
    /// Stream configuration.
    config: StreamConfig,
    /// Position to begin playback at.
    start_position: Duration,
}

impl Default for OpusCastBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OpusCastBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            source: None,
            sink: None,
            token: None,
            token_env: None,
            event_callback: None,
            config: StreamConfig::default(),
            start_position: Duration::ZERO,
        }
    }

    /// Set the source to decode audio from.
    ///
    /// For files, URLs, and anything else ffmpeg can read, use
    /// [`FfmpegSource`](crate::FfmpegSource).
    pub fn source<S: PcmSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Set a mock source generating synthetic PCM.
    ///
    /// Convenience for tests and local runs without a transcoder.
    pub fn mock_source(self, source: MockSource) -> Self {
        self.source(source)
    }

    /// Set the sink that receives the encoded frames.
    pub fn sink<S: FrameSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the authentication token handed to the sink at startup.
    pub fn token(mut self, token: AuthToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Read the authentication token from an environment variable.
    ///
    /// The variable is read once, inside [`start()`](Self::start); a
    /// missing or empty value fails the start with
    /// [`StreamError::MissingToken`]. An explicit [`token()`](Self::token)
    /// takes precedence.
    pub fn token_from_env(mut self, variable: impl Into<String>) -> Self {
        self.token_env = Some(variable.into());
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include underruns, sink errors, and lifecycle changes.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Set custom stream configuration.
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the encoding profile, along with its matching bitrate.
    pub fn profile(mut self, profile: AudioProfile) -> Self {
        self.config.profile = profile;
        self.config.bitrate = profile.bitrate();
        self
    }

    /// Begin playback at the given position instead of the start.
    ///
    /// Requires a source that supports seeking.
    pub fn start_at(mut self, position: Duration) -> Self {
        self.start_position = position;
        self
    }

    /// Validates the builder wiring.
    fn validate(&self) -> Result<(), StreamError> {
        if self.source.is_none() {
            return Err(StreamError::NoSourceConfigured);
        }
        if self.sink.is_none() {
            return Err(StreamError::NoSinkConfigured);
        }
        if self.start_position > Duration::ZERO {
            if let Some(ref source) = self.source {
                if !source.supports_seek() {
                    return Err(StreamError::SeekUnsupported {
                        description: source.description(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Start the streaming session.
    ///
    /// Returns a [`Session`] handle to control playback.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No source or no sink is configured
    /// - The configuration fails validation
    /// - The token environment variable is missing or empty
    /// - The encoder cannot be created
    /// - The sink fails to start
    pub async fn start(self) -> Result<Session, StreamError> {
        self.validate()?;
        self.config.validate()?;

        let Self {
            source,
            sink,
            token,
            token_env,
            event_callback,
            config,
            start_position,
        } = self;
        let source = source.ok_or(StreamError::NoSourceConfigured)?;
        let sink = sink.ok_or(StreamError::NoSinkConfigured)?;

        let token = match (token, token_env) {
            (Some(token), _) => Some(token),
            (None, Some(variable)) => Some(AuthToken::from_env(&variable)?),
            (None, None) => None,
        };

        let encoder = FrameEncoder::new(&config)?;

        let context = SinkContext::new(&config, token);
        if let Err(error) = sink.on_start(&context).await {
            return Err(StreamError::SinkStartFailed {
                sink_name: sink.name().to_string(),
                reason: error.to_string(),
            });
        }

        let state = Arc::new(SessionState::new());
        state.transition(PlaybackState::Idle, PlaybackState::Starting);
        state
            .position_ms
            .store(start_position.as_millis() as u64, Ordering::SeqCst);

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel(config.queue_depth);
        let (deliver_tx, deliver_rx) = mpsc::channel(DELIVER_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let seekable = source.supports_seek();
        let source_description = source.description();

        let decode_handle = spawn_decode_worker(DecodeWorker::new(
            source,
            config.clone(),
            state.clone(),
            chunk_tx,
            cmd_rx,
            event_callback.clone(),
            start_position,
        ));
        let encode_handle = spawn_encode_worker(EncodeWorker::new(
            encoder,
            state.clone(),
            chunk_rx,
            frame_tx,
            event_callback.clone(),
            config.max_encode_skips,
        ));
        let pacer_handle = spawn_pacer(Pacer::new(
            frame_rx,
            deliver_tx,
            state.clone(),
            event_callback.clone(),
            config.frame_duration,
        ));
        let deliver_handle = spawn_deliver_worker(DeliverWorker::new(
            sink,
            deliver_rx,
            state.clone(),
            event_callback.clone(),
            &config,
        ));

        Ok(Session::new(
            state,
            cmd_tx,
            decode_handle,
            encode_handle,
            pacer_handle,
            deliver_handle,
            event_callback,
            seekable,
            source_description,
        ))
    }
}

/// Main entry point for opuscast.
///
/// Use [`OpusCast::builder()`] to start configuring a stream.
pub struct OpusCast;

impl OpusCast {
    /// Creates a new builder for configuring a streaming session.
    pub fn builder() -> OpusCastBuilder {
        OpusCastBuilder::new()
    }
}
