use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

/// Failures surfaced by metadata lookup, seeking and decoding.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The metadata service rejected the bearer token.
    #[error("token rejected by metadata service (HTTP {status})")]
    Auth { status: u16 },

    /// No stream or no frames exist for the requested query.
    #[error("stream not found: {0}")]
    NotFound(String),

    /// The decoder reported HTTP 403 for the stream locator, usually an expired locator.
    #[error("can't open stream: 403 access denied ({0})")]
    AccessDenied(String),

    #[error("frame number {frame_number} out of bounds [{first}: {last}]")]
    OutOfRange {
        frame_number: u32,
        first: u32,
        last: u32,
    },

    /// The stream resolved but produced no data at all.
    #[error("empty stream, no data found")]
    EmptyStream,

    #[error("invalid stream metadata: {0}")]
    InvalidMetadata(String),

    #[error("failed to spawn decoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
