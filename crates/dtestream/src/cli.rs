use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Parser, Subcommand};
use dtestream_core::config::DEFAULT_API_BASE;

#[derive(Parser)]
#[command(name = "dtestream", about = "Seek and decode DestinE data streams")]
pub struct Cli {
    #[command(flatten)]
    pub connection: Connection,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every command.
#[derive(Args)]
pub struct Connection {
    /// Base URL of the streaming API.
    #[arg(long, global = true, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Bearer token for the streaming API.
    #[arg(long, global = true, env = "DTE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File holding the bearer token (JSON with `user_key`, or the bare token).
    #[arg(long, global = true)]
    pub token_file: Option<PathBuf>,
}

/// Which stream to open.
#[derive(Args)]
pub struct StreamArgs {
    /// Program subset, e.g. "Climate DT".
    #[arg(long, default_value = "Climate DT")]
    pub subset: String,

    /// Variable short name (continent for Sentinel-3 streams).
    #[arg(short, long)]
    pub variable: String,

    /// Start of the time range (YYYY-MM-DD[THH:MM[:SS]]).
    #[arg(long, value_parser = parse_datetime)]
    pub start: NaiveDateTime,

    /// End of the time range (YYYY-MM-DD[THH:MM[:SS]]).
    #[arg(long, value_parser = parse_datetime)]
    pub end: NaiveDateTime,

    /// Dataset family (climate, extremes, sentinel-3, legacy). Derived from the subset if omitted.
    #[arg(long)]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the streams the service offers.
    Overview,

    /// Show the metadata of a stream without decoding it.
    Info {
        #[command(flatten)]
        stream: StreamArgs,
    },

    /// Decode frames and write grayscale previews.
    Extract {
        #[command(flatten)]
        stream: StreamArgs,

        /// Seek to this time first (closest prior frame).
        #[arg(long, value_parser = parse_datetime)]
        from: Option<NaiveDateTime>,

        /// Maximum number of frames to decode.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Directory for PNG previews. Nothing is written if omitted.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Frame rate the stream was encoded at.
        #[arg(long, default_value_t = 25.0)]
        fps: f64,

        /// ffmpeg executable.
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,

        /// Stop decoding once this fraction of host memory is in use (0 disables).
        #[arg(long, default_value_t = 0.9)]
        memory_threshold: f64,
    },
}

pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, String> {
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid date/time: {s:?}"))
}
