//! APDU Trace CLI Application
//!
//! Command-line front end for the apdu-trace-decoder library. It reads text
//! traces (`APDU: <hex>` lines) from files or stdin, pairs commands with their
//! responses and prints the resulting transactions as text or JSON.

use anyhow::{Context, Result};
use apdu_trace_decoder::config::normalize_hex;
use apdu_trace_decoder::{Correlator, RenderMode, TraceReader, DEFAULT_NO_RESPONSE_MARKER};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

mod config;
mod report;

use config::{AppConfig, OutputFormat};

/// APDU Trace - Pair and display smart-card APDU traces
#[derive(Parser, Debug)]
#[command(name = "apdu-trace-cli")]
#[command(about = "Decode ISO 7816-4 APDU traces into command/response transactions", long_about = None)]
#[command(version)]
struct Args {
    /// Trace files to read in order (default: stdin)
    #[arg(value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output file for the report (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Report format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Show data as text instead of raw hex
    #[arg(short, long)]
    readable: bool,

    /// Show the time each transaction started (txt format)
    #[arg(long)]
    timestamps: bool,

    /// strftime pattern for timestamps (implies --timestamps)
    #[arg(long, value_name = "PATTERN")]
    time_format: Option<String>,

    /// Extra payload known to never get a response (hex, can be repeated)
    #[arg(long, value_name = "HEX")]
    marker: Vec<String>,

    /// Do not filter the default no-response payload
    #[arg(long)]
    no_default_marker: bool,

    /// Keep at most this many transactions (at least 1)
    #[arg(long, value_name = "COUNT")]
    max_history: Option<NonZeroUsize>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("APDU Trace CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", apdu_trace_decoder::VERSION);

    let config = build_config(&args)?;
    let mut correlator = Correlator::new(config.correlator.clone());

    if args.inputs.is_empty() {
        let stdin = io::stdin();
        feed(&mut correlator, stdin.lock(), "<stdin>")?;
    } else {
        for path in &args.inputs {
            let file = File::open(path)
                .with_context(|| format!("Failed to open trace file: {:?}", path))?;
            feed(&mut correlator, BufReader::new(file), &path.display().to_string())?;
        }
    }

    let stats = correlator.stats();
    log::info!(
        "{} transactions ({} frames, {} filtered, {} commands dropped, {} responses dropped, {} resets)",
        correlator.len(),
        stats.frames,
        stats.filtered,
        stats.commands_dropped,
        stats.responses_dropped,
        stats.resets
    );
    if correlator.is_awaiting_response() {
        log::warn!("Trace ended with a command still waiting for its response");
    }

    let transactions = correlator.snapshot();
    match &config.output.file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            let mut out = BufWriter::new(file);
            report::write_report(&mut out, &transactions, stats, &config.output)?;
            out.flush()?;
            log::info!("Report written to {:?}", path);
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            report::write_report(&mut out, &transactions, stats, &config.output)?;
        }
    }

    Ok(())
}

/// Merge the optional config file with command line overrides
fn build_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if args.no_default_marker {
        config
            .correlator
            .no_response_markers
            .retain(|m| normalize_hex(m) != DEFAULT_NO_RESPONSE_MARKER);
    }
    config.correlator = config.correlator.with_markers(&args.marker);

    if let Some(max) = args.max_history {
        config.correlator = config.correlator.with_max_history(max);
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if args.readable {
        config.output.mode = RenderMode::Readable;
    }
    if args.timestamps {
        config.output.timestamps = true;
    }
    if let Some(pattern) = &args.time_format {
        config.output.time_format = pattern.clone();
        config.output.timestamps = true;
    }
    report::validate_time_format(&config.output.time_format)?;
    if let Some(output) = &args.output {
        config.output.file = Some(output.clone());
    }

    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Push every frame of one trace source through the correlator
fn feed<R: BufRead>(correlator: &mut Correlator, reader: R, source: &str) -> Result<()> {
    log::info!("Reading trace: {}", source);

    let mut frames = TraceReader::new(reader);
    for frame in frames.by_ref() {
        let frame = frame.with_context(|| format!("Failed to read trace: {}", source))?;
        correlator.submit(frame);
    }

    log::debug!(
        "{}: {} lines, {} skipped",
        source,
        frames.line_number(),
        frames.skipped()
    );
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    // Logs go to stderr so the report on stdout stays clean
    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
