//! Feed ingestion daemon.
//!
//! Connects to a TRACE-style TCP feed, enriches each trade, and drains the
//! queue into a SQLite trade store.
//!
//! # Usage
//!
//! ```sh
//! tape-ingest --feed 127.0.0.1:5555 --db trades.db --sinks 2
//! ```
//!
//! Runs until the feed closes or Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tape::feed::pipeline::{DEFAULT_BATCH_SIZE, DEFAULT_SINKS, Pipeline, PipelineConfig};

/// Default feed address.
const DEFAULT_FEED: &str = "127.0.0.1:5555";

/// Default trade store path.
const DEFAULT_DB: &str = "trades.db";

/// Global flag for signal handling.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn main() {
    tape::init_tracing();

    if let Err(e) = run() {
        eprintln!("tape-ingest: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args(&std::env::args().collect::<Vec<_>>())?;

    eprintln!(
        "tape-ingest: feed {} -> {} ({} sink{})",
        config.feed_addr,
        config.db_path.display(),
        config.sinks,
        if config.sinks == 1 { "" } else { "s" }
    );

    let pipeline = Pipeline::spawn(config)?;

    eprintln!("tape-ingest: ready");

    setup_signal_handler();

    // Wait until the feed ends or a shutdown is requested.
    while !SHUTDOWN_REQUESTED.load(Ordering::Relaxed) && !pipeline.feed_finished() {
        std::thread::sleep(Duration::from_millis(100));
    }

    let stats = if SHUTDOWN_REQUESTED.load(Ordering::Relaxed) {
        eprintln!("\ntape-ingest: received shutdown signal");
        pipeline.shutdown()?
    } else {
        pipeline.join()?
    };

    eprintln!(
        "tape-ingest: done. ingested: {}, inserted: {}, parse errors: {}, bad CUSIPs: {}",
        stats.ingested, stats.inserted, stats.parse_errors, stats.bad_cusips
    );

    Ok(())
}

/// Spawns a thread that flips the shutdown flag on the first Ctrl-C-ish
/// event. Without a dedicated signal crate this just blocks; process
/// termination still drains via [`Pipeline`]'s `Drop`.
fn setup_signal_handler() {
    std::thread::Builder::new()
        .name("signal-handler".into())
        .spawn(|| {
            wait_for_signal();
            SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
        })
        .expect("failed to spawn signal handler thread");
}

#[cfg(unix)]
fn wait_for_signal() {
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

#[cfg(not(unix))]
fn wait_for_signal() {
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn parse_args(args: &[String]) -> Result<PipelineConfig, String> {
    let mut feed_addr: SocketAddr = DEFAULT_FEED.parse().expect("static default is valid");
    let mut db_path = PathBuf::from(DEFAULT_DB);
    let mut sinks = DEFAULT_SINKS;
    let mut batch_size = DEFAULT_BATCH_SIZE;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--feed" | "-f" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --feed")?;
                feed_addr = value
                    .parse()
                    .map_err(|_| format!("invalid feed address: {value}"))?;
            }
            "--db" | "-d" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --db")?;
                db_path = PathBuf::from(value);
            }
            "--sinks" | "-s" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --sinks")?;
                sinks = value
                    .parse()
                    .map_err(|_| format!("invalid sink count: {value}"))?;
            }
            "--batch" | "-b" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --batch")?;
                batch_size = value
                    .parse()
                    .map_err(|_| format!("invalid batch size: {value}"))?;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(PipelineConfig {
        feed_addr,
        db_path,
        sinks,
        batch_size,
        ..PipelineConfig::default()
    })
}

fn print_usage() {
    eprintln!(
        r#"tape-ingest - TRACE feed to SQL ingestion daemon

USAGE:
    tape-ingest [OPTIONS]

OPTIONS:
    -f, --feed <ADDR>   Feed address (default: 127.0.0.1:5555)
    -d, --db <PATH>     SQLite trade store path (default: trades.db)
    -s, --sinks <N>     Sink thread count (default: 1)
    -b, --batch <N>     Rows per insert transaction (default: 256)
    -h, --help          Print this help message

EXAMPLE:
    tape-ingest --feed 127.0.0.1:5555 --db trades.db --sinks 2
"#
    );
}
