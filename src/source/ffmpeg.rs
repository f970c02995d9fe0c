//! ffmpeg decoder subprocess wrapper.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::source::PcmSource;
use crate::{StreamConfig, StreamError};

/// How many trailing stderr lines to keep for error reports.
const STDERR_TAIL_LINES: usize = 8;

/// A source that decodes arbitrary audio through an ffmpeg child process.
///
/// ffmpeg opens the input (file path or URL), decodes and resamples it,
/// and writes interleaved s16le PCM to its stdout, which this source reads
/// block by block. The child's stderr is captured so decode failures can
/// report what ffmpeg actually complained about.
///
/// The child is spawned with `kill_on_drop`, so the process is released
/// even if the session is dropped without a clean stop.
///
/// # Example
///
/// ```no_run
/// use opuscast::FfmpegSource;
///
/// let source = FfmpegSource::new("https://example.com/track.mp3");
/// // Use with the OpusCast builder...
/// ```
pub struct FfmpegSource {
    input: String,
    ffmpeg_path: String,
    sample_rate: u32,
    channels: u16,
    block_bytes: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<Vec<String>>>,
}

impl FfmpegSource {
    /// Creates a new source for the given input path or URL.
    ///
    /// Nothing is spawned until the session starts.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ffmpeg_path: "ffmpeg".to_string(),
            sample_rate: 0,
            channels: 0,
            block_bytes: 0,
            child: None,
            stdout: None,
            stderr_task: None,
        }
    }

    /// Spawns the child decoding from the given position.
    async fn spawn_at(&mut self, position: Duration) -> Result<(), StreamError> {
        let args = transcode_args(&self.input, self.sample_rate, self.channels, position);
        tracing::debug!(input = %self.input, ?position, "spawning ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::Decode {
                message: format!("failed to spawn '{}': {e}", self.ffmpeg_path),
                partial: false,
            })?;

        self.stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(spawn_stderr_reader(stderr));
        }
        self.child = Some(child);
        Ok(())
    }

    /// Kills the current child, if any, and drops its pipes.
    async fn shutdown_child(&mut self) {
        self.stdout = None;
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("failed to kill ffmpeg: {e}");
            }
        }
    }

    /// Collects the captured stderr tail, joined into one line.
    async fn stderr_tail(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.map(|lines| lines.join("; ")).unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Reaps the exited child and maps its status to a result.
    ///
    /// A zero exit status is a clean end of stream; anything else becomes
    /// a decode error carrying the stderr tail.
    async fn check_exit(&mut self) -> Result<(), StreamError> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = child.wait().await.map_err(|e| StreamError::Decode {
            message: format!("failed to reap ffmpeg: {e}"),
            partial: false,
        })?;
        let tail = self.stderr_tail().await;

        if status.success() {
            tracing::debug!("ffmpeg finished: {}", status);
            Ok(())
        } else {
            let message = if tail.is_empty() {
                format!("ffmpeg exited with {status}")
            } else {
                format!("ffmpeg exited with {status}: {tail}")
            };
            Err(StreamError::Decode {
                message,
                partial: false,
            })
        }
    }
}

#[async_trait]
impl PcmSource for FfmpegSource {
    fn description(&self) -> String {
        format!("ffmpeg:{}", self.input)
    }

    fn supports_seek(&self) -> bool {
        true
    }

    async fn start(
        &mut self,
        config: &StreamConfig,
        position: Duration,
    ) -> Result<(), StreamError> {
        self.ffmpeg_path = config.ffmpeg_path.clone();
        self.sample_rate = config.sample_rate;
        self.channels = config.channels;
        self.block_bytes = config.samples_per_frame() * 2;
        self.spawn_at(position).await
    }

    async fn read_block(&mut self) -> Result<Option<Vec<i16>>, StreamError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(StreamError::Decode {
                message: "source not started".to_string(),
                partial: false,
            });
        };

        let mut buf = vec![0u8; self.block_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            let n = stdout
                .read(&mut buf[filled..])
                .await
                .map_err(|e| StreamError::Decode {
                    message: format!("failed reading decoder output: {e}"),
                    partial: false,
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            // Pipe closed; decide between clean EOF and decoder failure
            return self.check_exit().await.map(|()| None);
        }

        // A truncated trailing byte cannot form a sample
        buf.truncate(filled - filled % 2);
        Ok(Some(bytes_to_samples(&buf)))
    }

    async fn restart_at(&mut self, position: Duration) -> Result<(), StreamError> {
        self.shutdown_child().await;
        self.spawn_at(position).await
    }

    async fn stop(&mut self) {
        self.shutdown_child().await;
    }
}

/// Builds the ffmpeg argument list for one transcode run.
///
/// `-ss` is placed before `-i` so ffmpeg seeks on the demuxer instead of
/// decoding and discarding everything up to the target.
fn transcode_args(input: &str, sample_rate: u32, channels: u16, position: Duration) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
    ];
    if !position.is_zero() {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", position.as_secs_f64()));
    }
    args.extend([
        "-i".to_string(),
        input.to_string(),
        "-vn".to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        channels.to_string(),
        "pipe:1".to_string(),
    ]);
    args
}

/// Converts little-endian byte pairs to interleaved samples.
fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Reads the child's stderr, keeping the last few non-empty lines.
fn spawn_stderr_reader(stderr: ChildStderr) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::debug!("ffmpeg: {}", trimmed);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(trimmed.to_string());
        }
        tail.into_iter().collect()
    })
}
