use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tick_mux::sink::FileSinkOpener;
use tick_mux::source::DirectorySource;
use tick_mux::{AggregatorMode, MarketDataMux, MuxConfig};
use tracing_subscriber::EnvFilter;
use types::record::LineFilter;

/// Merge per-symbol tick files into one time-ordered file.
#[derive(Parser, Debug)]
#[command(name = "tick-mux", version = tick_mux::SERVICE_VERSION)]
struct Args {
    /// Directory holding one file per symbol
    #[arg(long, env = "TICK_MUX_INPUT_DIR", default_value = ".")]
    input_dir: PathBuf,

    /// Output file, written into the input directory when relative
    #[arg(long, env = "TICK_MUX_OUTPUT", default_value = "result.txt")]
    output: PathBuf,

    /// Extension of the input files
    #[arg(long, default_value = "txt")]
    extension: String,

    /// Producer threads (defaults to available parallelism)
    #[arg(long, env = "TICK_MUX_WORKERS")]
    workers: Option<usize>,

    /// Per-source deadline in milliseconds
    #[arg(long)]
    source_timeout_ms: Option<u64>,

    /// Drain concurrently with producers instead of waiting for all sources
    #[arg(long)]
    pipelined: bool,

    /// Line that is skipped wherever it appears
    #[arg(long, default_value = "...")]
    sentinel: String,

    /// Leading lines skipped in every source
    #[arg(long, default_value_t = 1)]
    header_lines: usize,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    summary_json: bool,
}

impl Args {
    fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            workers: self.workers,
            aggregator_mode: if self.pipelined {
                AggregatorMode::Pipelined
            } else {
                AggregatorMode::Rendezvous
            },
            source_timeout: self.source_timeout_ms.map(Duration::from_millis),
            line_filter: LineFilter {
                header_lines: self.header_lines,
                sentinel: self.sentinel.clone(),
            },
            ..MuxConfig::default()
        }
    }

    fn output_path(&self) -> PathBuf {
        if self.output.is_absolute() {
            self.output.clone()
        } else {
            self.input_dir.join(&self.output)
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.input_dir.is_dir(),
        "input directory {} does not exist",
        args.input_dir.display()
    );

    let output = args.output_path();
    let source = DirectorySource::new(&args.input_dir, &args.extension).excluding_output(&output);
    let sink = FileSinkOpener::new(&output);

    tracing::info!(
        version = tick_mux::SERVICE_VERSION,
        input = %source.root().display(),
        output = %output.display(),
        "Starting tick multiplexer"
    );

    let mux = MarketDataMux::new(args.mux_config());
    let report = mux
        .run(&source, &source, &sink)
        .with_context(|| format!("multiplexing {}", args.input_dir.display()))?;

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    tracing::debug!(metrics = ?mux.metrics().export(), "Final metrics");

    Ok(())
}
