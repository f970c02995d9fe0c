//! # opuscast
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time Opus streaming from arbitrary audio inputs.
//!
//! `opuscast` decodes any input ffmpeg can read into raw PCM, packs it
//! into fixed-duration Opus frames, and delivers them to a sink at a
//! strict real-time cadence: exactly one frame per tick, with silence
//! filling any gap the decoder leaves.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use opuscast::{ChannelSink, FfmpegSource, OpusCast};
//! use tokio::sync::mpsc;
//!
//! // User channel capacity: size based on your consumer's processing speed
//! let (tx, mut rx) = mpsc::channel(32);
//!
//! let session = OpusCast::builder()
//!     .source(FfmpegSource::new("episode.mp3"))
//!     .sink(ChannelSink::new(tx))
//!     .token_from_env("STREAM_TOKEN")
//!     .on_event(|e| tracing::warn!(?e, "stream event"))
//!     .start()
//!     .await?;
//!
//! // Frames arrive at exactly one per 20ms tick
//! while let Some(frame) = rx.recv().await {
//!     // forward to the wire
//! }
//!
//! session.wait().await?;
//! ```
//!
//! ## Architecture
//!
//! The pipeline is a chain of four tasks connected by bounded queues:
//!
//! ```text
//! ffmpeg → Decode Task → Encode Task → Pacer Task → Deliver Task → Sink
//! ```
//!
//! - **Decode**: drives the transcoder subprocess that turns any input into PCM
//! - **Encode**: packs PCM into fixed-duration Opus frames
//! - **Pacer**: releases exactly one frame per tick of an absolute clock
//! - **Deliver**: pushes frames into the sink with timeout and retry handling
//!
//! Backpressure from the bounded queues keeps decoding only a few frames
//! ahead of real time, and the pacer computes every deadline from the
//! stream start, so scheduling jitter never accumulates into drift.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod chunk;
mod config;
mod encoder;
mod error;
mod event;
mod frame;
mod pipeline;
mod session;
mod sink;
pub mod source;

pub use builder::{OpusCast, OpusCastBuilder};
pub use chunk::PcmChunk;
pub use config::{AudioProfile, AuthToken, StreamConfig};
pub use error::{SinkError, StreamError};
pub use event::{event_callback, EventCallback, StreamEvent};
pub use frame::{OpusFrame, SILENCE_PAYLOAD};
pub use session::{PlaybackState, Session, SessionStats};
pub use sink::{ChannelSink, FileSink, FrameSink, SinkContext};
pub use source::{FfmpegSource, MockSource, PcmSource};
