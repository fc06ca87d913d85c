//! Dataset scan
//!
//! Runs the batching pipeline over a dataset for a number of epochs without a
//! model attached and reports what the trainer would have received.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use clemens_data::{BatchReader, LoaderConfig, PipelineSummary};
use serde::Serialize;

/// Log every N consumed batches
const LOG_EVERY_BATCHES: u64 = 100;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a packed position dataset through the batch loader")]
struct Cli {
    /// Packed position file (`.gz` is decompressed, `-` reads stdin)
    #[arg(long)]
    dataset: PathBuf,

    /// Positions per batch
    #[arg(long, default_value_t = 4096)]
    batch_size: usize,

    /// Number of passes over the dataset
    #[arg(long, default_value_t = 1)]
    epochs: u32,

    /// Batch channel capacity (default: 128 x batch size)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Consumer poll timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print per-epoch summaries as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct EpochReport {
    epoch: u32,
    batches_consumed: u64,
    elapsed_ms: u64,
    #[serde(flatten)]
    summary: PipelineSummary,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tools::init_logger(cli.verbose);

    let mut config = LoaderConfig::new(&cli.dataset)
        .with_batch_size(cli.batch_size)
        .with_poll_interval(Duration::from_millis(cli.poll_interval_ms));
    if let Some(capacity) = cli.queue_capacity {
        config = config.with_queue_capacity(capacity);
    }
    config.validate()?;

    for epoch in 1..=cli.epochs {
        let report = scan_epoch(&config, epoch)
            .with_context(|| format!("epoch {epoch} over {}", cli.dataset.display()))?;

        if cli.json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            let s = &report.summary;
            eprintln!(
                "epoch {epoch}: {} batches, {} positions read, {} batched, {} dropped ({} ms)",
                report.batches_consumed,
                s.positions_read,
                s.positions_batched,
                s.positions_dropped,
                report.elapsed_ms
            );
        }
    }
    Ok(())
}

/// One pass with a fresh loader.
fn scan_epoch(config: &LoaderConfig, epoch: u32) -> Result<EpochReport> {
    let start = Instant::now();
    let mut reader = BatchReader::start(config)?;
    let mut consumed = 0u64;

    while let Some(batch) = reader.next_batch()? {
        consumed += 1;
        if consumed % LOG_EVERY_BATCHES == 0 {
            log::info!(
                "epoch {epoch}: {consumed} batches ({} positions, {} queued)",
                consumed * batch.len() as u64,
                reader.queued()
            );
        }
    }

    let summary = reader.finish()?;
    Ok(EpochReport {
        epoch,
        batches_consumed: consumed,
        elapsed_ms: start.elapsed().as_millis() as u64,
        summary,
    })
}
