//! chainportal CLI: inspect a portal dataset and stream finalized blocks.
//!
//! Usage:
//! ```bash
//! # Current finalized height
//! chainportal height --url https://portal.sqd.dev/datasets/ethereum-mainnet
//!
//! # One-shot query, one block per line
//! chainportal query --url $PORTAL_URL --query transfers.json --from 20000000 --to 20000010
//!
//! # Continuous stream; Ctrl-C stops it
//! chainportal stream --url $PORTAL_URL --query transfers.json --from 20000000 --stop-on-head
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use chainportal_core::{Block, PortalQuery};
use chainportal_stream::{PortalClient, StreamOptions};

#[derive(Parser)]
#[command(
    name = "chainportal",
    about = "Query and stream finalized blocks from a blockchain data portal",
    long_about = "
ChainPortal CLI: talk to the finalized-stream API of a portal dataset.

ENVIRONMENT VARIABLES:
  PORTAL_URL   Dataset URL, e.g. https://portal.sqd.dev/datasets/ethereum-mainnet
  RUST_LOG     Log filter (default: info, or debug with --verbose)
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dataset's current finalized height
    Height {
        #[command(flatten)]
        portal: PortalArgs,
    },

    /// Run a query once and print every block as a JSON line
    Query {
        #[command(flatten)]
        portal: PortalArgs,
        #[command(flatten)]
        range: QueryArgs,
    },

    /// Stream finalized blocks and print one progress line per batch
    Stream {
        #[command(flatten)]
        portal: PortalArgs,
        #[command(flatten)]
        range: QueryArgs,
        #[command(flatten)]
        buffer: StreamArgs,
        /// Print blocks as JSON lines instead of progress lines
        #[arg(long)]
        blocks: bool,
    },
}

#[derive(Args)]
struct PortalArgs {
    /// Portal dataset URL
    #[arg(long, env = "PORTAL_URL")]
    url: String,
}

#[derive(Args)]
struct QueryArgs {
    /// Path to a JSON query ({"type": "evm", "fields": ..., "logs": [...]})
    #[arg(long)]
    query: PathBuf,
    /// Override the query's first block
    #[arg(long)]
    from: Option<u64>,
    /// Override the query's last block
    #[arg(long)]
    to: Option<u64>,
}

#[derive(Args)]
struct StreamArgs {
    /// Release a batch once this many bytes are buffered
    #[arg(long)]
    min_bytes: Option<usize>,
    /// Stop reading from the portal while this many bytes are buffered
    #[arg(long)]
    max_bytes: Option<usize>,
    /// Release partial data after this much upstream silence (ms, 0 disables)
    #[arg(long)]
    max_idle_ms: Option<u64>,
    /// Release partial data after waiting this long for a batch (ms, 0 disables)
    #[arg(long)]
    max_wait_ms: Option<u64>,
    /// Delay between polls once the finalized head is reached (ms)
    #[arg(long)]
    head_poll_ms: Option<u64>,
    /// End the stream at the finalized head instead of polling
    #[arg(long)]
    stop_on_head: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Height { portal } => cmd_height(&portal).await,
        Commands::Query { portal, range } => cmd_query(&portal, &range).await,
        Commands::Stream {
            portal,
            range,
            buffer,
            blocks,
        } => cmd_stream(&portal, &range, &buffer, blocks).await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_height(portal: &PortalArgs) -> Result<()> {
    let client = PortalClient::new(&portal.url)?;
    let height = client
        .finalized_height()
        .await
        .with_context(|| format!("failed to fetch finalized height from {}", portal.url))?;
    println!("{height}");
    Ok(())
}

async fn cmd_query(portal: &PortalArgs, range: &QueryArgs) -> Result<()> {
    let client = PortalClient::new(&portal.url)?;
    let query = load_query(range)?;
    let blocks: Vec<Block> = client.finalized_query(&query).await.context("query failed")?;
    for block in &blocks {
        println!("{}", serde_json::to_string(block)?);
    }
    tracing::info!(blocks = blocks.len(), "query complete");
    Ok(())
}

async fn cmd_stream(portal: &PortalArgs, range: &QueryArgs, args: &StreamArgs, print_blocks: bool) -> Result<()> {
    let client = PortalClient::new(&portal.url)?;
    let query = load_query(range)?;
    let mut stream = client.finalized_stream_with::<Block>(query, stream_options(args));

    let cancel = stream.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping stream");
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let mut total = 0usize;
    let mut last = None;
    while let Some(batch) = stream.next().await {
        let batch = batch.context("stream failed")?;
        total += batch.len();
        last = batch.last_block().or(last);

        if print_blocks {
            for block in &batch.blocks {
                println!("{}", serde_json::to_string(block)?);
            }
            continue;
        }
        let tip = batch
            .finalized_head
            .as_ref()
            .map_or_else(|| "?".to_string(), |head| head.number.to_string());
        println!(
            "blocks {}..{} ({}) tip {} total {} in {:.1}s",
            batch.first_block().unwrap_or_default(),
            batch.last_block().unwrap_or_default(),
            batch.len(),
            tip,
            total,
            started.elapsed().as_secs_f64(),
        );
    }

    tracing::info!(blocks = total, last_block = ?last, "stream ended");
    Ok(())
}

fn load_query(args: &QueryArgs) -> Result<PortalQuery> {
    let text = std::fs::read_to_string(&args.query)
        .with_context(|| format!("failed to read {}", args.query.display()))?;
    let mut query: PortalQuery =
        serde_json::from_str(&text).with_context(|| format!("invalid query in {}", args.query.display()))?;
    if let Some(from) = args.from {
        query.from_block = Some(from);
    }
    if let Some(to) = args.to {
        query.to_block = Some(to);
    }
    Ok(query)
}

fn stream_options(args: &StreamArgs) -> StreamOptions {
    let mut options = StreamOptions::default().stop_on_head(args.stop_on_head);
    if let Some(min) = args.min_bytes {
        options = options.with_min_bytes(min);
    }
    if let Some(max) = args.max_bytes {
        options = options.with_max_bytes(max);
    }
    if let Some(ms) = args.max_idle_ms {
        options = options.with_max_idle_time(millis(ms));
    }
    if let Some(ms) = args.max_wait_ms {
        options = options.with_max_wait_time(millis(ms));
    }
    if let Some(ms) = args.head_poll_ms {
        options = options.with_head_poll_interval(Duration::from_millis(ms));
    }
    options
}

/// `0` disables a timer.
fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
