pub mod datasets;

use std::time::Duration;

pub use datasets::{DatasetProfile, GridKind};

/// Production streaming API.
pub const DEFAULT_API_BASE: &str = "https://streamer.destine.eu/api/streaming/";

/// Process-wide settings, resolved once and handed to constructors.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Base URL of the streaming API. Must end with `/`.
    pub api_base: String,
    /// Frame rate the streams were encoded at. Seek offsets are derived from it.
    pub fps: f64,
    /// Decoder executable.
    pub ffmpeg_path: String,
    /// Stop producing frames once host memory use reaches this fraction (0.0-1.0).
    /// None disables the guard.
    pub memory_threshold: Option<f64>,
    /// Upper bound on the stderr prefix inspected after spawning the decoder.
    pub stderr_probe_bytes: usize,
    /// How long to wait for the decoder's first diagnostic line.
    pub stderr_probe_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            fps: 25.0,
            ffmpeg_path: "ffmpeg".to_string(),
            memory_threshold: Some(0.90),
            stderr_probe_bytes: 1000,
            stderr_probe_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(60),
        }
    }
}
