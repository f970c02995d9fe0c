//! Frame-dump file sink implementation.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::sink::{FrameSink, SinkContext};
use crate::{OpusFrame, SinkError};

// Dump file format constants.
//
// Layout: 16-byte header, then one length-prefixed record per frame
// (u32 LE payload length followed by the raw Opus packet).

/// Magic bytes identifying a frame dump file.
const DUMP_MAGIC: [u8; 8] = *b"OPUSCAST";

/// Total size of the dump header in bytes.
const DUMP_HEADER_SIZE: usize = 16;

/// Byte offset of the sample rate field (u32 LE).
const DUMP_RATE_OFFSET: usize = 8;

/// Byte offset of the channel count field (u16 LE).
const DUMP_CHANNELS_OFFSET: usize = 12;

/// Byte offset of the frame duration field in milliseconds (u16 LE).
const DUMP_FRAME_MS_OFFSET: usize = 14;

/// A sink that dumps encoded frames to a file.
///
/// Each frame is written as a u32 length prefix followed by the raw Opus
/// packet, after a small header recording the stream format. Useful for
/// capturing a session for offline inspection or replay.
///
/// The file is created on first send and flushed on `on_stop()`. All file
/// I/O is performed in a blocking thread pool to avoid blocking the async
/// runtime.
///
/// # Example
///
/// ```no_run
/// use opuscast::FileSink;
///
/// let sink = FileSink::new("session.opuscast");
/// // Use with the OpusCast builder...
/// ```
pub struct FileSink {
    name: String,
    path: Arc<PathBuf>,
    state: Arc<Mutex<FileState>>,
}

struct FileState {
    writer: Option<BufWriter<File>>,
    frames_written: u64,
    sample_rate: u32,
    channels: u16,
    frame_ms: u16,
}

impl FileSink {
    /// Creates a new file sink writing to the given path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("file:{}", path.as_ref().display()),
            path: Arc::new(path.as_ref().to_path_buf()),
            state: Arc::new(Mutex::new(FileState {
                writer: None,
                frames_written: 0,
                sample_rate: 0,
                channels: 0,
                frame_ms: 0,
            })),
        }
    }

    /// Flush buffered data to disk.
    ///
    /// Useful for ensuring data is persisted during long sessions. This
    /// operation runs in a blocking thread to avoid blocking the async
    /// runtime.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);

        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            if let Some(ref mut writer) = state.writer {
                writer
                    .flush()
                    .map_err(|e| SinkError::file_error(&*path, e))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| SinkError::custom(format!("flush task panicked: {e}")))?
    }

    /// Writes the dump header with the stream format.
    fn write_header(
        writer: &mut BufWriter<File>,
        sample_rate: u32,
        channels: u16,
        frame_ms: u16,
    ) -> std::io::Result<()> {
        writer.write_all(&DUMP_MAGIC)?;
        writer.write_all(&sample_rate.to_le_bytes())?;
        writer.write_all(&channels.to_le_bytes())?;
        writer.write_all(&frame_ms.to_le_bytes())?;
        Ok(())
    }

    /// Performs the actual write operation in a blocking context.
    fn write_frame_blocking(
        state: &mut FileState,
        path: &PathBuf,
        payload: &[u8],
    ) -> Result<(), SinkError> {
        // on_start records the format; a zero rate means it never ran
        if state.sample_rate == 0 {
            return Err(SinkError::NotInitialized);
        }

        // Create the file on first send
        if state.writer.is_none() {
            let file = File::create(path).map_err(|e| SinkError::file_error(path, e))?;
            let mut writer = BufWriter::new(file);

            Self::write_header(&mut writer, state.sample_rate, state.channels, state.frame_ms)
                .map_err(|e| SinkError::file_error(path, e))?;

            state.writer = Some(writer);
        }

        if let Some(ref mut writer) = state.writer {
            let len = payload.len() as u32;
            writer
                .write_all(&len.to_le_bytes())
                .map_err(|e| SinkError::file_error(path, e))?;
            writer
                .write_all(payload)
                .map_err(|e| SinkError::file_error(path, e))?;
            state.frames_written += 1;
        }

        Ok(())
    }

    /// Flushes and closes the writer in a blocking context.
    ///
    /// Returns the number of frames written.
    fn finalize_blocking(state: &mut FileState, path: &PathBuf) -> Result<u64, SinkError> {
        if let Some(ref mut writer) = state.writer {
            writer.flush().map_err(|e| SinkError::file_error(path, e))?;
        }
        state.writer = None;
        Ok(state.frames_written)
    }
}

#[async_trait]
impl FrameSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_start(&self, ctx: &SinkContext) -> Result<(), SinkError> {
        // Record the format; the file itself is created on first send
        let mut state = self.state.lock().await;
        state.sample_rate = ctx.sample_rate;
        state.channels = ctx.channels;
        state.frame_ms = ctx.frame_duration.as_millis() as u16;
        Ok(())
    }

    async fn send(&self, frame: &OpusFrame) -> Result<(), SinkError> {
        tracing::trace!(
            "FileSink {}: writing frame {} ({} bytes)",
            self.name,
            frame.seq,
            frame.payload.len()
        );

        let payload = frame.payload.clone();
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);

        // Run file I/O in blocking thread pool
        tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::write_frame_blocking(&mut state, &path, &payload)
        })
        .await
        .map_err(|e| SinkError::custom(format!("write task panicked: {e}")))?
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        let state = Arc::clone(&self.state);
        let path = Arc::clone(&self.path);

        let frames = tokio::task::spawn_blocking(move || {
            let mut state = state.blocking_lock();
            Self::finalize_blocking(&mut state, &path)
        })
        .await
        .map_err(|e| SinkError::custom(format!("finalize task panicked: {e}")))??;

        tracing::debug!("FileSink {}: finalized after {} frame(s)", self.name, frames);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StreamConfig;
    use tempfile::tempdir;

    fn test_ctx() -> SinkContext {
        SinkContext::new(&StreamConfig::default(), None)
    }

    #[tokio::test]
    async fn test_file_sink_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        let frame = OpusFrame::new(0, 0, vec![0xAA, 0xBB]);
        sink.send(&frame).await.unwrap();
        sink.on_stop().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..8], b"OPUSCAST");

        let rate = u32::from_le_bytes([
            data[DUMP_RATE_OFFSET],
            data[DUMP_RATE_OFFSET + 1],
            data[DUMP_RATE_OFFSET + 2],
            data[DUMP_RATE_OFFSET + 3],
        ]);
        assert_eq!(rate, 48000);

        let channels = u16::from_le_bytes([data[DUMP_CHANNELS_OFFSET], data[DUMP_CHANNELS_OFFSET + 1]]);
        assert_eq!(channels, 2);

        let frame_ms = u16::from_le_bytes([data[DUMP_FRAME_MS_OFFSET], data[DUMP_FRAME_MS_OFFSET + 1]]);
        assert_eq!(frame_ms, 20);
    }

    #[tokio::test]
    async fn test_file_sink_length_prefixes_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        sink.send(&OpusFrame::new(0, 0, vec![0x11, 0x22, 0x33]))
            .await
            .unwrap();
        sink.send(&OpusFrame::new(1, 0, vec![0x44])).await.unwrap();
        sink.on_stop().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        let mut offset = DUMP_HEADER_SIZE;

        let len1 = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        assert_eq!(len1, 3);
        assert_eq!(&data[offset + 4..offset + 7], &[0x11, 0x22, 0x33]);
        offset += 4 + 3;

        let len2 = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        assert_eq!(len2, 1);
        assert_eq!(data[offset + 4], 0x44);
        assert_eq!(data.len(), offset + 4 + 1);
    }

    #[tokio::test]
    async fn test_file_sink_invalid_path_error() {
        // Try to write to a nonexistent directory
        let path = PathBuf::from("/nonexistent/directory/session.opuscast");
        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        let result = sink.send(&OpusFrame::new(0, 0, vec![1, 2])).await;

        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_file_sink_send_before_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        let result = sink.send(&OpusFrame::new(0, 0, vec![1])).await;

        assert!(matches!(result, Err(SinkError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_file_sink_flush_before_send() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        // Flush before any send should succeed (no-op)
        let result = sink.flush().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_file_sink_on_stop_before_send() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        // Stop without sending anything - should not create file
        let result = sink.on_stop().await;
        assert!(result.is_ok());

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_sink_multiple_frames_total_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.opuscast");

        let sink = FileSink::new(&path);
        sink.on_start(&test_ctx()).await.unwrap();

        for seq in 0..5u64 {
            sink.send(&OpusFrame::new(seq, 0, vec![0u8; 10])).await.unwrap();
        }
        sink.on_stop().await.unwrap();

        let data = std::fs::read(&path).unwrap();
        // 5 records of (4-byte prefix + 10-byte payload) after the header
        assert_eq!(data.len(), DUMP_HEADER_SIZE + 5 * 14);
    }

    #[test]
    fn test_file_sink_name() {
        let sink = FileSink::new("/path/to/session.opuscast");
        assert_eq!(sink.name(), "file:/path/to/session.opuscast");
    }
}
