//! Synthetic TRACE feed generator.
//!
//! Serves randomly generated trade records as line-delimited JSON over TCP,
//! one client at a time, for exercising `tape-ingest` without a real feed.
//!
//! # Usage
//!
//! ```sh
//! tape-feedgen --listen 127.0.0.1:5555 --rate 1000 --count 100000
//! ```

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use rand::Rng;
use rand::seq::SliceRandom;

use tape::feed::types::{ReportingCapacity, Side, Trade, cusip};

const DEFAULT_LISTEN: &str = "127.0.0.1:5555";

/// Issuers emitted by the generator; mirrors the seeded reference table.
const ISSUERS: &[&str] = &[
    "US Treasury",
    "IBM",
    "Apple",
    "Microsoft",
    "Johnson & Johnson",
    "Fannie Mae",
    "Goldman Sachs",
    "Citi",
    "Amazon",
    "Pfizer",
];

const CUSIP_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CONTROL_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

struct FeedgenConfig {
    listen: SocketAddr,
    /// Messages per second; zero means unthrottled.
    rate: f64,
    /// Total messages before exit; zero means serve forever.
    count: u64,
    /// Probability of emitting the matching leg of a trade.
    pair_prob: f64,
}

fn main() {
    tape::init_tracing();

    let config = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("tape-feedgen: {msg}");
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config) {
        eprintln!("tape-feedgen: {e}");
        std::process::exit(1);
    }
}

fn run(config: &FeedgenConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.listen)?;
    eprintln!(
        "tape-feedgen: listening on {} ({} msg/s, count {})",
        config.listen,
        config.rate,
        if config.count == 0 {
            "unbounded".to_string()
        } else {
            config.count.to_string()
        }
    );

    let mut remaining = config.count;
    loop {
        eprintln!("tape-feedgen: waiting for client...");
        let (stream, peer) = listener.accept()?;
        eprintln!("tape-feedgen: client connected from {peer}");

        match serve(stream, config, &mut remaining) {
            Ok(()) if config.count > 0 && remaining == 0 => {
                eprintln!("tape-feedgen: count reached, exiting");
                return Ok(());
            }
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => {
                eprintln!("tape-feedgen: client disconnected");
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
    )
}

/// Streams trades to one client until the count is reached or it hangs up.
fn serve(
    mut stream: TcpStream,
    config: &FeedgenConfig,
    remaining: &mut u64,
) -> std::io::Result<()> {
    let mut rng = rand::thread_rng();
    let interval = if config.rate > 0.0 {
        Some(Duration::from_secs_f64(1.0 / config.rate))
    } else {
        None
    };

    loop {
        if config.count > 0 && *remaining == 0 {
            return Ok(());
        }

        let trade = random_trade(&mut rng, None);
        let paired = (config.pair_prob > 0.0 && rng.gen_bool(config.pair_prob))
            .then(|| random_trade(&mut rng, Some(&trade)));

        send_trade(&mut stream, &trade)?;
        if config.count > 0 {
            *remaining -= 1;
        }

        if let Some(leg) = paired
            && (config.count == 0 || *remaining > 0)
        {
            send_trade(&mut stream, &leg)?;
            if config.count > 0 {
                *remaining -= 1;
            }
        }

        if let Some(interval) = interval {
            std::thread::sleep(interval);
        }
    }
}

fn send_trade(stream: &mut TcpStream, trade: &Trade) -> std::io::Result<()> {
    let mut line = serde_json::to_string(trade).expect("trade serializes");
    line.push('\n');
    stream.write_all(line.as_bytes())
}

fn random_string(rng: &mut impl Rng, chars: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| *chars.choose(rng).expect("non-empty charset") as char)
        .collect()
}

/// Generates a valid 9-character CUSIP.
fn random_cusip(rng: &mut impl Rng) -> String {
    let base = random_string(rng, CUSIP_CHARS, 8);
    let check = cusip::check_digit(&base).expect("generated base is valid");
    let mut out = base;
    out.push(check);
    out
}

/// Generates one trade leg. When `pair` is given, the new leg shares its
/// control id, CUSIP, and execution time, and takes the opposite side.
fn random_trade(rng: &mut impl Rng, pair: Option<&Trade>) -> Trade {
    let now = Utc::now();
    let exec_time = match pair {
        Some(p) => p.exec_time,
        None => now - TimeDelta::seconds(rng.gen_range(0..600)),
    };
    let report_delay = TimeDelta::seconds(rng.gen_range(0..1800));
    let report_time = exec_time + report_delay;
    let late = report_delay.num_seconds() > tape::feed::types::ON_TIME_THRESHOLD_SECS;

    let maturity_days = rng.gen_range(365..3650);
    let maturity = (now + TimeDelta::days(maturity_days)).date_naive();

    Trade {
        control_id: match pair {
            Some(p) => p.control_id.clone(),
            None => random_string(rng, CONTROL_ID_CHARS, 10),
        },
        cusip: match pair {
            Some(p) => p.cusip.clone(),
            None => random_cusip(rng),
        },
        issuer: (*ISSUERS.choose(rng).expect("non-empty issuer list")).to_string(),
        exec_time,
        report_time,
        price: (rng.gen_range(90.0..110.0) * 1000.0_f64).round() / 1000.0,
        volume: rng.gen_range(100_000..=5_000_000),
        side: match pair {
            Some(p) => p.side.flipped(),
            None => {
                if rng.gen_bool(0.5) {
                    Side::Buy
                } else {
                    Side::Sell
                }
            }
        },
        dealer_id: rng.gen_range(1000..=9999),
        reporting_capacity: if rng.gen_bool(0.5) {
            ReportingCapacity::Principal
        } else {
            ReportingCapacity::Agent
        },
        modifier3: if late { "Z".to_string() } else { String::new() },
        coupon: (rng.gen_range(1.0..6.0) * 100.0_f64).round() / 100.0,
        maturity,
    }
}

fn parse_args(args: &[String]) -> Result<FeedgenConfig, String> {
    let mut config = FeedgenConfig {
        listen: DEFAULT_LISTEN.parse().expect("static default is valid"),
        rate: 1.0,
        count: 0,
        pair_prob: 0.0,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--listen" | "-l" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --listen")?;
                config.listen = value
                    .parse()
                    .map_err(|_| format!("invalid listen address: {value}"))?;
            }
            "--rate" | "-r" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --rate")?;
                config.rate = value
                    .parse()
                    .map_err(|_| format!("invalid rate: {value}"))?;
            }
            "--count" | "-n" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --count")?;
                config.count = value
                    .parse()
                    .map_err(|_| format!("invalid count: {value}"))?;
            }
            "--pair-prob" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --pair-prob")?;
                config.pair_prob = value
                    .parse()
                    .map_err(|_| format!("invalid pair probability: {value}"))?;
                if !(0.0..=1.0).contains(&config.pair_prob) {
                    return Err("pair probability must be within 0.0..=1.0".into());
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    Ok(config)
}

fn print_usage() {
    eprintln!(
        r#"tape-feedgen - synthetic TRACE feed generator

USAGE:
    tape-feedgen [OPTIONS]

OPTIONS:
    -l, --listen <ADDR>    Listen address (default: 127.0.0.1:5555)
    -r, --rate <N>         Messages per second, 0 = unthrottled (default: 1)
    -n, --count <N>        Total messages, 0 = unbounded (default: 0)
        --pair-prob <P>    Probability of emitting the matching leg (default: 0)
    -h, --help             Print this help message

EXAMPLE:
    tape-feedgen --listen 127.0.0.1:5555 --rate 1000 --count 100000 --pair-prob 0.3
"#
    );
}
