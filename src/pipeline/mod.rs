//! Streaming pipeline components.
//!
//! The pipeline connects the decoder to the sink through bounded queues:
//!
//! ```text
//! Decode Task → Chunk Queue → Encode Task → Frame Queue → Pacer Task → Deliver Task → Sink
//! ```
//!
//! - **Decode**: Drives the PCM source, stamps chunks with sequence and epoch
//! - **Encode**: Packs PCM into fixed-duration Opus frames
//! - **Pacer**: Releases exactly one frame per tick of the delivery clock
//! - **Deliver**: Pushes frames into the sink with timeout and retry logic
//!
//! The bounded queues keep decoding only a few frames ahead of real time,
//! so a seek has little stale audio to discard. Shutdown cascades through
//! the queues: each stage closing its sender ends the next stage's loop.

mod decode;
mod deliver;
mod encode;
mod pacer;

pub(crate) use decode::{spawn_decode_worker, DecodeCommand, DecodeWorker};
pub(crate) use deliver::{spawn_deliver_worker, DeliverWorker};
pub(crate) use encode::{spawn_encode_worker, EncodeWorker};
pub(crate) use pacer::{spawn_pacer, Pacer};
