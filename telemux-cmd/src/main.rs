mod decoder;

use std::io::stderr;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::Parser;
use telemux::{Engine, EngineConfig};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use decoder::CategoryDecoder;

/// Reads framed surveillance telemetry from stdin, a file, or a network
/// multicast stream and renders the decoded records to one or more output
/// channels.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Replay frames from a capture or telemetry file.
    #[arg(short, long, value_name = "path", conflicts_with = "multicast")]
    file: Option<PathBuf>,

    /// Receive frames from a multicast group. A trailing :S locks delivery
    /// to a single sender.
    #[arg(short = 'i', long, value_name = "group:iface:port[:S]")]
    multicast: Option<String>,

    /// Input encapsulation: raw, capture-file, wrapper-protocol,
    /// fixed-format, or bit-oriented-link.
    #[arg(short = 'e', long, default_value = "raw", value_name = "tag")]
    encap: String,

    /// Rendering for the default stdout channel: compact-line, verbose-text,
    /// structured-markup, or geospatial-markup.
    #[arg(short = 'F', long, default_value = "verbose-text", value_name = "tag")]
    format: String,

    /// Output channel descriptors, fan-out order, e.g.
    /// "disk plots.kml:0 geospatial-markup". Replaces the default stdout
    /// channel; may be given multiple times.
    #[arg(short, long = "output", value_name = "descriptor")]
    outputs: Vec<String>,

    /// File replayed as the failover input after the primary input fails.
    #[arg(long, value_name = "path")]
    failover_file: Option<PathBuf>,

    /// Consecutive transport failures that trigger the failover switch.
    #[arg(long, default_value_t = 1, value_name = "count")]
    failure_threshold: u32,

    /// Liveness heartbeat interval in seconds; 0 disables supervision.
    #[arg(long, default_value_t = 0, value_name = "secs")]
    heartbeat: u64,

    /// Category definitions file.
    #[arg(
        short,
        long,
        default_value = "config/definitions.ini",
        value_name = "path"
    )]
    definitions: PathBuf,

    /// Print a JSON run summary to stderr after the stream drains.
    #[arg(long)]
    stats: bool,

    /// Show more information during program execution.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TELEMUX_LOG")
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if !cli.definitions.is_file() {
        error!(
            "definitions file {} not found",
            cli.definitions.display()
        );
        exit(2);
    }
    let decoder = match CategoryDecoder::load(&cli.definitions) {
        Ok(decoder) => decoder,
        Err(err) => {
            error!("{err:#}");
            exit(2);
        }
    };

    let input = if let Some(file) = &cli.file {
        format!("disk {}:0:0 {}", file.display(), cli.encap)
    } else if let Some(spec) = &cli.multicast {
        format!("udp {spec} {}", cli.encap)
    } else {
        format!("std - {}", cli.encap)
    };
    let outputs = if cli.outputs.is_empty() {
        vec![format!("std - {}", cli.format)]
    } else {
        cli.outputs.clone()
    };

    debug!(descriptor = input.as_str(), "input channel");
    for (i, out) in outputs.iter().enumerate() {
        debug!(descriptor = out.as_str(), "output channel {}", i + 1);
    }

    let mut config = EngineConfig::builder()
        .input(input)
        .outputs(outputs)
        .failure_threshold(cli.failure_threshold)
        .build();
    config.failover = cli
        .failover_file
        .as_ref()
        .map(|p| format!("disk {}:0:0 {}", p.display(), cli.encap));
    config.heartbeat = (cli.heartbeat > 0).then(|| Duration::from_secs(cli.heartbeat));

    let mut engine = match Engine::new(config, Box::new(decoder)) {
        Ok(engine) => engine,
        Err(err) => {
            error!("could not initialize the engine: {err}");
            exit(1);
        }
    };

    let handle = engine.shutdown_handle();
    if let Err(err) = ctrlc::set_handler(move || handle.shutdown()) {
        warn!(%err, "could not install the interrupt handler");
    }

    match engine.run() {
        Ok(summary) => {
            if cli.stats {
                match serde_json::to_string_pretty(&summary) {
                    Ok(text) => eprintln!("{text}"),
                    Err(err) => error!(%err, "failed to serialize the run summary"),
                }
            }
            info!(records = summary.records, "done");
        }
        Err(err) => {
            error!("runtime failure: {err}");
            exit(1);
        }
    }
}
