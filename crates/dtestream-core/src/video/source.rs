use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::sample::SampleFormat;
use crate::config::StreamerConfig;
use crate::error::{StreamError, StreamResult};

/// Where and how much of a stream to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub locator: String,
    pub seek_seconds: f64,
    pub duration_seconds: f64,
    pub sample_format: SampleFormat,
}

/// A running decode of one stream segment.
pub trait FrameStream {
    /// Fill `buf` with the next frame's raw samples. Returns the number of bytes read;
    /// anything short of `buf.len()` means the stream is exhausted.
    fn read_frame(&mut self, buf: &mut [u8]) -> StreamResult<usize>;

    /// Stop decoding and release the underlying resources. Idempotent.
    fn terminate(&mut self);
}

/// Starts decodes. The only seam between seek logic and the actual decoder.
pub trait FrameByteSource {
    fn spawn(&mut self, request: &SpawnRequest) -> StreamResult<Box<dyn FrameStream>>;
}

/// Decodes by piping raw samples from the ffmpeg CLI.
pub struct FfmpegSource {
    program: String,
    probe_bytes: usize,
    probe_timeout: Duration,
}

impl FfmpegSource {
    pub fn new(config: &StreamerConfig) -> Self {
        Self {
            program: config.ffmpeg_path.clone(),
            probe_bytes: config.stderr_probe_bytes,
            probe_timeout: config.stderr_probe_timeout,
        }
    }

    fn args(request: &SpawnRequest) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostats".to_string(),
            "-ss".to_string(),
            format!("{:.2}", request.seek_seconds),
            "-i".to_string(),
            request.locator.clone(),
            "-t".to_string(),
            format!("{:.2}", request.duration_seconds),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            request.sample_format.pix_fmt().to_string(),
            "pipe:1".to_string(),
        ]
    }
}

impl FrameByteSource for FfmpegSource {
    fn spawn(&mut self, request: &SpawnRequest) -> StreamResult<Box<dyn FrameStream>> {
        info!(
            locator = %request.locator,
            seek_seconds = request.seek_seconds,
            duration_seconds = request.duration_seconds,
            pix_fmt = request.sample_format.pix_fmt(),
            "spawning ffmpeg decoder process"
        );

        let mut child = Command::new(&self.program)
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| StreamError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let (drain, prefix) = match child.stderr.take() {
            Some(stderr) => {
                let (drain, rx) = drain_stderr(stderr);
                let prefix = collect_prefix(&rx, self.probe_bytes, self.probe_timeout);
                (Some(drain), prefix)
            }
            None => (None, String::new()),
        };

        let mut stream = FfmpegStream {
            child,
            stdout,
            drain,
            terminated: false,
        };

        if let Some(message) = access_denied(&prefix) {
            error!(locator = %request.locator, %message, "decoder refused stream");
            stream.terminate();
            return Err(StreamError::AccessDenied(message));
        }

        debug!(stderr_prefix = %prefix.trim_end(), "decoder started");
        Ok(Box::new(stream))
    }
}

/// Keep ffmpeg's stderr pipe drained for the lifetime of the process. Chunks are
/// forwarded to the returned receiver for as long as someone listens.
fn drain_stderr(mut stderr: ChildStderr) -> (JoinHandle<()>, Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match stderr.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = tx.send(buf[..n].to_vec());
                }
            }
        }
    });
    (handle, rx)
}

/// Gather stderr until the first complete line, `limit` bytes, EOF, or `timeout`.
fn collect_prefix(rx: &Receiver<Vec<u8>>, limit: usize, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut prefix = Vec::new();

    while prefix.len() < limit && !prefix.contains(&b'\n') {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => prefix.extend_from_slice(&chunk),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!(?timeout, bytes = prefix.len(), "stderr probe timed out");
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    prefix.truncate(limit);
    String::from_utf8_lossy(&prefix).into_owned()
}

/// ffmpeg reports HTTP failures as `[https @ 0x...] HTTP error 403 Forbidden`. Only the
/// text after the bracketed context is inspected so that a locator containing "403"
/// does not trip the check.
fn access_denied(stderr_prefix: &str) -> Option<String> {
    stderr_prefix.lines().find_map(|line| {
        let (_, message) = line.split_once(']')?;
        let message = message.trim();
        message.contains("403").then(|| message.to_string())
    })
}

pub struct FfmpegStream {
    child: Child,
    stdout: Option<ChildStdout>,
    drain: Option<JoinHandle<()>>,
    terminated: bool,
}

impl FrameStream for FfmpegStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(0);
        };

        let mut read = 0;
        while read < buf.len() {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) => {
                    error!(%e, read_bytes = read, "failed to read from ffmpeg pipe");
                    return Err(e.into());
                }
            }
        }

        if read > 0 && read < buf.len() {
            warn!(
                read_bytes = read,
                expected_bytes = buf.len(),
                "ffmpeg stream ended mid-frame"
            );
        }
        Ok(read)
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        // Close our end first so a blocked writer sees EPIPE instead of waiting on us.
        drop(self.stdout.take());
        let _ = self.child.kill();
        match self.child.wait() {
            Ok(status) => debug!(%status, "ffmpeg decoder exited"),
            Err(e) => warn!(%e, "failed to reap ffmpeg decoder"),
        }
        // A grandchild of a wrapper script can outlive the kill and keep stderr open.
        // Only join a drain that is already done; otherwise leave it to see EOF on its own.
        if let Some(drain) = self.drain.take() {
            if drain.is_finished() {
                let _ = drain.join();
            } else {
                debug!("stderr still held open after kill, detaching drain thread");
            }
        }
        info!("closed ffmpeg decoder");
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_use_two_decimal_offsets() {
        let request = SpawnRequest {
            locator: "https://cdn/x.mp4".to_string(),
            seek_seconds: 100.0 / 25.0,
            duration_seconds: 3.0 / 25.0,
            sample_format: SampleFormat::Gray12,
        };
        let args = FfmpegSource::args(&request);
        let joined = args.join(" ");
        assert_eq!(
            joined,
            "-hide_banner -nostats -ss 4.00 -i https://cdn/x.mp4 -t 0.12 -f rawvideo -pix_fmt gray12le pipe:1"
        );
    }

    #[test]
    fn detects_403_after_context() {
        let stderr = "[https @ 0x5581c0] HTTP error 403 Forbidden\nhttps://cdn/x.mp4: Server returned 403\n";
        assert_eq!(access_denied(stderr).as_deref(), Some("HTTP error 403 Forbidden"));
    }

    #[test]
    fn ignores_403_inside_locator() {
        assert_eq!(access_denied("https://cdn/token403/x.mp4: No such file\n"), None);
        assert_eq!(access_denied("Input #0, mov,mp4, from 'x':\n"), None);
        assert_eq!(access_denied(""), None);
    }

    #[test]
    fn prefix_stops_at_first_line() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"[https @ 0x1] HTTP error 403 Forbidden\nmore".to_vec()).unwrap();
        tx.send(b"never read\n".to_vec()).unwrap();
        let prefix = collect_prefix(&rx, 1000, Duration::from_secs(5));
        assert_eq!(prefix, "[https @ 0x1] HTTP error 403 Forbidden\nmore");
    }

    #[test]
    fn prefix_is_bounded_by_limit_and_disconnect() {
        let (tx, rx) = mpsc::channel();
        tx.send(vec![b'x'; 40]).unwrap();
        drop(tx);
        assert_eq!(collect_prefix(&rx, 16, Duration::from_secs(5)).len(), 16);

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        drop(tx);
        assert_eq!(collect_prefix(&rx, 16, Duration::from_secs(5)), "");
    }

    #[cfg(unix)]
    #[test]
    fn terminate_does_not_wait_for_orphaned_stderr_holders() {
        // The backgrounded sleep inherits stderr and survives the kill of its parent shell.
        let mut child = Command::new("sh")
            .args(["-c", "sleep 20 & wait"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take();
        let (drain, _rx) = drain_stderr(child.stderr.take().unwrap());
        let mut stream = FfmpegStream {
            child,
            stdout,
            drain: Some(drain),
            terminated: false,
        };

        let started = Instant::now();
        stream.terminate();
        assert!(started.elapsed() < Duration::from_secs(10), "{:?}", started.elapsed());
        assert!(stream.drain.is_none());
        stream.terminate();
    }

    #[test]
    fn prefix_wait_is_bounded_by_timeout() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>();
        let started = Instant::now();
        assert_eq!(collect_prefix(&rx, 16, Duration::from_millis(50)), "");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
