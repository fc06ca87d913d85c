//! Print decoded records as JSON lines

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use clemens_data::io::open_reader;
use clemens_data::{FeaturePair, PositionRecord, RecordDecoder};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode packed positions and print them as JSON lines")]
struct Cli {
    /// Packed position file (`.gz` is decompressed, `-` reads stdin)
    input: PathBuf,

    /// Stop after printing N records
    #[arg(long)]
    limit: Option<u64>,

    /// Skip the first N records
    #[arg(long, default_value_t = 0)]
    skip: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RecordLine<'a> {
    index: u64,
    #[serde(flatten)]
    record: &'a PositionRecord,
    white_features: &'a [u32],
    black_features: &'a [u32],
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tools::init_logger(cli.verbose);

    let reader =
        open_reader(&cli.input).with_context(|| format!("open {}", cli.input.display()))?;
    let mut decoder = RecordDecoder::new(reader);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut printed = 0u64;
    while cli.limit.is_none_or(|limit| printed < limit) {
        let index = decoder.records_read();
        let Some(record) = decoder.next_record()? else {
            break;
        };
        if index < cli.skip {
            continue;
        }

        let features = FeaturePair::from_record(&record);
        let line = RecordLine {
            index,
            record: &record,
            white_features: features.white.indices(),
            black_features: features.black.indices(),
        };
        serde_json::to_writer(&mut out, &line)?;
        out.write_all(b"\n")?;
        printed += 1;
    }
    out.flush()?;

    log::debug!("printed {printed} records, {} bytes read", decoder.bytes_read());
    Ok(())
}
