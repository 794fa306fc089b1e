//! Queue demonstration driver.
//!
//! Runs P producer threads and C consumer threads over a single bounded
//! MPMC queue and verifies that nothing is lost or duplicated.
//!
//! # Usage
//!
//! ```sh
//! tape-driver --producers 40 --consumers 40 --items 100000
//! ```
//!
//! # Environment variables
//!
//! ```sh
//! PIN_CPUS=1 tape-driver ...   # pin worker threads round-robin to cores
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use minstant::Instant;

use tape::sync::mpmc;

/// Queue capacity; must be a power of two.
const QUEUE_SIZE: usize = 1024;

/// Default worker counts, matching a many-to-many stress shape.
const DEFAULT_PRODUCERS: usize = 40;
const DEFAULT_CONSUMERS: usize = 40;
const DEFAULT_ITEMS_PER_PRODUCER: u64 = 100_000;

/// Progress report interval, in items.
const PROGRESS_EVERY: u64 = 100_000;

/// Consecutive failures before a worker switches from yielding to sleeping.
const SPIN_LIMIT: u32 = 64;

/// Sleep once a worker has spun past the limit.
const BACKOFF: Duration = Duration::from_micros(50);

struct DriverConfig {
    producers: usize,
    consumers: usize,
    items_per_producer: u64,
    pin_cpus: bool,
}

fn main() {
    tape::init_tracing();

    let config = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("tape-driver: {msg}");
            print_usage();
            std::process::exit(1);
        }
    };

    run(&config);
}

/// Backoff shared by producers and consumers: yield first, sleep once the
/// queue has stayed full/empty for a while.
fn backoff(failures: u32) {
    if failures < SPIN_LIMIT {
        thread::yield_now();
    } else {
        thread::sleep(BACKOFF);
    }
}

fn pin_to_cpu(enabled: bool, index: usize) {
    if !enabled {
        return;
    }
    if let Some(cores) = core_affinity::get_core_ids()
        && !cores.is_empty()
    {
        core_affinity::set_for_current(cores[index % cores.len()]);
    }
}

fn run(config: &DriverConfig) {
    let total = config.producers as u64 * config.items_per_producer;

    eprintln!(
        "tape-driver: {} producers x {} items -> {} consumers (queue size {QUEUE_SIZE})",
        config.producers, config.items_per_producer, config.consumers
    );

    let (producer, consumer) = mpmc::channel::<u64, QUEUE_SIZE>();

    let produced = Arc::new(AtomicU64::new(0));
    let consumed = Arc::new(AtomicU64::new(0));
    let checksum_in = Arc::new(AtomicU64::new(0));
    let checksum_out = Arc::new(AtomicU64::new(0));
    // With nothing to produce the consumers have nothing to wait for.
    let done = Arc::new(AtomicBool::new(total == 0));

    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.producers + config.consumers);

    for id in 0..config.producers {
        let tx = producer.clone();
        let produced = Arc::clone(&produced);
        let checksum_in = Arc::clone(&checksum_in);
        let items = config.items_per_producer;
        let pin = config.pin_cpus;
        handles.push(
            thread::Builder::new()
                .name(format!("producer-{id}"))
                .spawn(move || {
                    pin_to_cpu(pin, id);
                    for i in 0..items {
                        let item = id as u64 * items + i;
                        let mut failures = 0u32;
                        while tx.push(item).is_err() {
                            failures += 1;
                            backoff(failures);
                        }
                        checksum_in.fetch_add(item, Ordering::Relaxed);
                        let count = produced.fetch_add(1, Ordering::Relaxed) + 1;
                        if count % PROGRESS_EVERY == 0 {
                            eprintln!("[producer {id}] produced total: {count}");
                        }
                    }
                })
                .expect("failed to spawn producer thread"),
        );
    }
    drop(producer);

    for id in 0..config.consumers {
        let rx = consumer.clone();
        let consumed = Arc::clone(&consumed);
        let checksum_out = Arc::clone(&checksum_out);
        let done = Arc::clone(&done);
        let producers = config.producers;
        let pin = config.pin_cpus;
        handles.push(
            thread::Builder::new()
                .name(format!("consumer-{id}"))
                .spawn(move || {
                    pin_to_cpu(pin, producers + id);
                    let mut failures = 0u32;
                    loop {
                        if done.load(Ordering::Acquire) {
                            break;
                        }
                        if let Some(item) = rx.pop() {
                            failures = 0;
                            checksum_out.fetch_add(item, Ordering::Relaxed);
                            let count = consumed.fetch_add(1, Ordering::Relaxed) + 1;
                            if count % PROGRESS_EVERY == 0 {
                                eprintln!("[consumer {id}] consumed total: {count}, value: {item}");
                            }
                            if count >= total {
                                done.store(true, Ordering::Release);
                            }
                        } else {
                            failures += 1;
                            backoff(failures);
                        }
                    }
                })
                .expect("failed to spawn consumer thread"),
        );
    }
    drop(consumer);

    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    let elapsed = start.elapsed();
    let produced = produced.load(Ordering::Relaxed);
    let consumed = consumed.load(Ordering::Relaxed);
    let sum_in = checksum_in.load(Ordering::Relaxed);
    let sum_out = checksum_out.load(Ordering::Relaxed);

    let ops_per_sec = if elapsed.as_nanos() > 0 {
        (consumed as u128) * 1_000_000_000 / elapsed.as_nanos()
    } else {
        0
    };

    eprintln!(
        "tape-driver: done. produced: {produced}, consumed: {consumed}, \
         {:.3}s, {ops_per_sec} items/s",
        elapsed.as_secs_f64()
    );

    if produced != consumed || sum_in != sum_out {
        eprintln!(
            "tape-driver: INTEGRITY FAILURE (produced {produced} consumed {consumed}, \
             checksum in {sum_in} out {sum_out})"
        );
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<DriverConfig, String> {
    let mut config = DriverConfig {
        producers: DEFAULT_PRODUCERS,
        consumers: DEFAULT_CONSUMERS,
        items_per_producer: DEFAULT_ITEMS_PER_PRODUCER,
        pin_cpus: std::env::var("PIN_CPUS").is_ok_and(|v| v == "1"),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--producers" | "-p" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --producers")?;
                config.producers = value
                    .parse()
                    .map_err(|_| format!("invalid producer count: {value}"))?;
            }
            "--consumers" | "-c" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --consumers")?;
                config.consumers = value
                    .parse()
                    .map_err(|_| format!("invalid consumer count: {value}"))?;
            }
            "--items" | "-n" => {
                i += 1;
                let value = args.get(i).ok_or("missing value for --items")?;
                config.items_per_producer = value
                    .parse()
                    .map_err(|_| format!("invalid item count: {value}"))?;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(format!("unknown argument: {arg}")),
        }
        i += 1;
    }

    if config.producers == 0 || config.consumers == 0 {
        return Err("need at least one producer and one consumer".into());
    }

    Ok(config)
}

fn print_usage() {
    eprintln!(
        r#"tape-driver - bounded MPMC queue demonstration driver

USAGE:
    tape-driver [OPTIONS]

OPTIONS:
    -p, --producers <N>   Producer thread count (default: 40)
    -c, --consumers <N>   Consumer thread count (default: 40)
    -n, --items <N>       Items per producer (default: 100000)
    -h, --help            Print this help message

ENVIRONMENT:
    PIN_CPUS=1            Pin worker threads round-robin to cores

EXAMPLE:
    tape-driver --producers 8 --consumers 4 --items 250000
"#
    );
}
