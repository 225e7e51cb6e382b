mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dtestream_core::metadata::{load_token, StreamQuery};
use dtestream_core::preview::save_frame_png;
use dtestream_core::{
    DatasetProfile, DteStreamSession, EndReason, FfmpegSource, MetadataClient, MetadataSource,
    StreamError, StreamerConfig,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    let token = resolve_token(&cli.connection)?;
    let mut config = StreamerConfig {
        api_base: cli.connection.api_base.clone(),
        ..StreamerConfig::default()
    };
    if !config.api_base.ends_with('/') {
        config.api_base.push('/');
    }

    match cli.command {
        cli::Command::Overview => {
            let client = MetadataClient::new(&config).context("failed to build HTTP client")?;
            let overview = client
                .fetch_overview(&token)
                .context("failed to fetch stream overview")?;
            print!("{}", overview.render_table());
            Ok(())
        }
        cli::Command::Info { stream } => {
            let profile = resolve_profile(&stream)?;
            let client = MetadataClient::new(&config).context("failed to build HTTP client")?;
            let descriptor = client
                .fetch(&profile, &query(&stream), &token)
                .context("failed to fetch stream metadata")?;

            println!("profile:    {}", profile.name);
            println!("name:       {} ({})", descriptor.parameter_name, descriptor.parameter_short_name);
            println!("unit:       {}", descriptor.unit);
            println!("level type: {}", descriptor.level_type);
            println!("size:       {} x {}", descriptor.width, descriptor.height);
            if let Some(bbox) = descriptor.extent.map(|e| e.bbox()) {
                println!(
                    "bbox:       [{}, {}, {}, {}]",
                    bbox.min_lon, bbox.min_lat, bbox.max_lon, bbox.max_lat
                );
            }
            if let (Some(first), Some(last)) = (descriptor.frames.first(), descriptor.frames.last()) {
                println!(
                    "frames:     {} ({} .. {}, #{} .. #{})",
                    descriptor.frames.len(),
                    first.timestamp,
                    last.timestamp,
                    first.frame_number,
                    last.frame_number
                );
            }
            Ok(())
        }
        cli::Command::Extract {
            stream,
            from,
            count,
            output_dir,
            fps,
            ffmpeg,
            memory_threshold,
        } => {
            config.fps = fps;
            config.ffmpeg_path = ffmpeg;
            config.memory_threshold = (memory_threshold > 0.0).then_some(memory_threshold);

            let profile = resolve_profile(&stream)?;
            info!(profile = profile.name, ?from, count, ?output_dir, "starting extraction");

            let client = MetadataClient::new(&config).context("failed to build HTTP client")?;
            let source = Box::new(FfmpegSource::new(&config));
            let mut session =
                DteStreamSession::open(&client, source, &config, profile, &query(&stream), &token)
                    .context("failed to open stream session")?;

            if let Some(from) = from {
                let found = session
                    .seek_to_date(from)
                    .with_context(|| format!("failed to seek to {from}"))?;
                if !found {
                    bail!(
                        "{from} is outside the stream range {} .. {}",
                        session.first_timestamp(),
                        session.last_timestamp()
                    );
                }
            }

            if let Some(dir) = &output_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }

            let mut extracted = 0usize;
            for frame in session.frames().take(count) {
                let frame = frame.context("failed to decode frame")?;
                let range = frame
                    .finite_range()
                    .map(|(lo, hi)| format!("{lo:.3} .. {hi:.3}"))
                    .unwrap_or_else(|| "no data".to_string());
                println!("#{} {} {}", frame.frame_number, frame.timestamp, range);

                if let Some(dir) = &output_dir {
                    save_frame_png(&frame, dir)?;
                }
                extracted += 1;
            }

            match session.end_reason() {
                Some(EndReason::EmptyStream) => return Err(StreamError::EmptyStream.into()),
                Some(EndReason::MemoryPressure) => {
                    warn!(extracted, "stopped early because host memory is nearly exhausted")
                }
                _ => {}
            }

            info!(extracted, unit = session.unit(), "extraction complete");
            Ok(())
        }
    }
}

fn resolve_token(connection: &cli::Connection) -> Result<String> {
    if let Some(token) = &connection.token {
        return Ok(token.clone());
    }
    if let Some(path) = &connection.token_file {
        return load_token(path)
            .with_context(|| format!("failed to read token from {}", path.display()));
    }
    bail!("no token given; pass --token, --token-file or set DTE_TOKEN")
}

fn resolve_profile(stream: &cli::StreamArgs) -> Result<DatasetProfile> {
    match &stream.profile {
        Some(name) => DatasetProfile::by_name(name).with_context(|| {
            format!(
                "unknown profile {name:?}, expected one of: {}",
                DatasetProfile::names().collect::<Vec<_>>().join(", ")
            )
        }),
        None => Ok(DatasetProfile::for_subset(&stream.subset)),
    }
}

fn query(stream: &cli::StreamArgs) -> StreamQuery {
    StreamQuery {
        subset: stream.subset.clone(),
        variable: stream.variable.clone(),
        start: stream.start,
        end: stream.end,
    }
}
