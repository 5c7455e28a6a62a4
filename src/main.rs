//! cog-stream - prepare and read tiles of a remote Cloud-Optimized GeoTIFF.
//!
//! Opens the resource, declares the tiles given on the command line, prepares
//! them with coalesced range requests and optionally reads a byte window.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cog_stream::{
    config::{Cli, ReadWindow},
    create_s3_client, HttpRangeSource, PrepareReport, RandomAccessTileStream, RangeFetchClient,
    RangeSource, S3RangeSource, StreamError, StreamOptions, TileCache,
};

/// Bytes shown per line of the hex preview.
const PREVIEW_WIDTH: usize = 16;

/// Maximum bytes shown in the hex preview.
const PREVIEW_LIMIT: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StreamError> {
    let source = build_source(&cli).await?;
    let fetcher = Arc::new(RangeFetchClient::with_timeout(source, cli.fetch.timeout())?);
    let cache = Arc::new(TileCache::from_config(&cli.cache).await?);

    info!("Opening {}", cli.uri);
    let mut stream = RandomAccessTileStream::open(
        cli.uri.as_str(),
        fetcher,
        cache,
        StreamOptions::from(&cli.fetch),
    )
    .await?;

    match stream.len() {
        Some(len) => info!("  Length: {} bytes", len),
        None => info!("  Length: unknown"),
    }

    for tile in &cli.tiles {
        stream.add_tile(tile.id, tile.offset, tile.length)?;
    }

    let report = stream.prepare().await?;
    print_report(&report, cli.json);

    if let Some(window) = cli.read {
        print_window(&stream, window).await?;
    }

    Ok(())
}

/// Pick the transport from the URI scheme.
async fn build_source(cli: &Cli) -> Result<Arc<dyn RangeSource>, StreamError> {
    if cli.uri.starts_with("s3://") {
        let client = create_s3_client(cli.s3_endpoint.as_deref(), &cli.s3_region).await;
        Ok(Arc::new(S3RangeSource::new(client)))
    } else {
        Ok(Arc::new(HttpRangeSource::new()?))
    }
}

fn print_report(report: &PrepareReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
        return;
    }

    println!("Declared tiles:  {}", report.declared);
    println!("Already cached:  {}", report.already_cached);
    println!("Fetched tiles:   {}", report.fetched_tiles);
    println!("Bytes fetched:   {}", report.bytes_fetched);
    if let Some(len) = report.header_truncated_to {
        println!("Header trimmed:  {} bytes", len);
    }
    println!("Ranges:          {}", report.ranges.len());
    for range in &report.ranges {
        println!("  {} ({} bytes)", range, range.len());
    }
}

async fn print_window(stream: &RandomAccessTileStream, window: ReadWindow) -> Result<(), StreamError> {
    let bytes = stream.read_at(window.position, window.length).await?;
    println!();
    println!("Read {} bytes at {}:", bytes.len(), window.position);

    let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
    for (line, chunk) in shown.chunks(PREVIEW_WIDTH).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!(
            "  {:>10}  {}",
            window.position + (line * PREVIEW_WIDTH) as u64,
            hex.join(" ")
        );
    }
    if bytes.len() > PREVIEW_LIMIT {
        println!("  ... {} more bytes", bytes.len() - PREVIEW_LIMIT);
    }
    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "cog_stream=debug"
    } else {
        "cog_stream=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
