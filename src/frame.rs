//! Encoded Opus frame with delivery metadata.

/// The canonical Opus silence payload.
///
/// Three bytes the decoder treats as a fully silent frame, used to keep
/// the delivery cadence alive when no encoded audio is ready in time.
pub const SILENCE_PAYLOAD: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// One encoded Opus frame as delivered to the sink.
///
/// Frames are produced by the encoder in production order, then stamped
/// with their delivery sequence by the pacer. The delivered sequence is
/// gapless: silence frames injected on underrun consume sequence numbers
/// like any other frame.
#[derive(Debug, Clone)]
pub struct OpusFrame {
    /// Delivery sequence number, starting at 0 and incrementing by exactly
    /// one per delivered frame. Resets to 0 after a seek.
    pub seq: u64,

    /// Playback epoch this frame belongs to.
    pub epoch: u32,

    /// The encoded Opus packet.
    pub payload: Vec<u8>,

    /// Marks the last frame of the stream.
    ///
    /// Set on the final encoded frame (after tail padding) so sinks can
    /// flush or close without waiting for the channel to drop.
    pub is_final: bool,

    /// `true` for silence frames injected by the pacer on underrun.
    pub is_silence: bool,
}

impl OpusFrame {
    /// Creates a frame from an encoded payload.
    pub fn new(seq: u64, epoch: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            epoch,
            payload,
            is_final: false,
            is_silence: false,
        }
    }

    /// Creates a silence frame for the given delivery slot.
    pub fn silence(seq: u64, epoch: u32) -> Self {
        Self {
            seq,
            epoch,
            payload: SILENCE_PAYLOAD.to_vec(),
            is_final: false,
            is_silence: true,
        }
    }
}
