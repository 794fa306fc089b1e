//! End-to-end integration tests for the feed pipeline.
//!
//! These tests verify the complete flow:
//! 1. A feed thread serves line-delimited JSON trades over a real TCP socket
//! 2. The pipeline's reader parses and enriches them and queues them
//! 3. Sink threads drain the queue into a SQLite trade store
//! 4. The store contents are checked for loss, duplication, and enrichment
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=tape=debug cargo test --features tracing --test pipeline -- --nocapture
//! ```

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rusqlite::Connection;

use tape::feed::pipeline::{Pipeline, PipelineConfig};
use tape::feed::types::{ReportingCapacity, Side, Trade};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        tape::init_tracing();
    });
}

/// Unique temp database path per test.
fn temp_db(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "tape-pipeline-{tag}-{}-{}.db",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Removes the database and its WAL companions.
fn cleanup_db(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.clone().into_os_string();
        p.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(p));
    }
}

/// Builds a deterministic trade; every fifth one is reported late.
fn make_trade(i: u32) -> Trade {
    let exec = Utc.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).unwrap() + chrono::TimeDelta::seconds(i.into());
    let delay_secs = if i % 5 == 0 { 1200 } else { 300 };
    Trade {
        control_id: format!("CTRL{i:06}"),
        cusip: "594918104".to_string(),
        issuer: if i % 2 == 0 { "Microsoft" } else { "Citi" }.to_string(),
        exec_time: exec,
        report_time: exec + chrono::TimeDelta::seconds(delay_secs),
        price: 99.5 + f64::from(i % 10),
        volume: 100_000 + u64::from(i),
        side: if i % 2 == 0 { Side::Buy } else { Side::Sell },
        dealer_id: 1000 + (i % 9000),
        reporting_capacity: if i % 3 == 0 {
            ReportingCapacity::Agent
        } else {
            ReportingCapacity::Principal
        },
        modifier3: if delay_secs > 900 { "Z" } else { "" }.to_string(),
        coupon: 2.75,
        maturity: chrono::NaiveDate::from_ymd_opt(2033, 3, 15).unwrap(),
    }
}

/// Serves the given lines to the first client, then closes the connection.
fn spawn_feed(lines: Vec<String>) -> (SocketAddr, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        for line in &lines {
            conn.write_all(line.as_bytes()).expect("write line");
            conn.write_all(b"\n").expect("write newline");
        }
    });
    (addr, handle)
}

fn trade_lines(count: u32) -> Vec<String> {
    (0..count)
        .map(|i| serde_json::to_string(&make_trade(i)).unwrap())
        .collect()
}

#[test]
fn end_to_end_feed_to_store() {
    init_test_tracing();

    const COUNT: u32 = 500;
    let db = temp_db("e2e");
    cleanup_db(&db);

    let (addr, feed) = spawn_feed(trade_lines(COUNT));

    let pipeline = Pipeline::spawn(PipelineConfig {
        feed_addr: addr,
        db_path: db.clone(),
        sinks: 2,
        batch_size: 64,
        ..PipelineConfig::default()
    })
    .expect("pipeline spawns");

    let stats = pipeline.join().expect("pipeline completes");
    feed.join().expect("feed thread");

    assert_eq!(stats.ingested, u64::from(COUNT));
    assert_eq!(stats.inserted, u64::from(COUNT));
    assert_eq!(stats.parse_errors, 0);
    assert_eq!(stats.bad_cusips, 0);

    let conn = Connection::open(&db).unwrap();

    let rows: u64 = conn
        .query_row("SELECT COUNT(*) FROM trades", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, u64::from(COUNT));

    // No record lost or duplicated.
    let distinct: u64 = conn
        .query_row("SELECT COUNT(DISTINCT control_id) FROM trades", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(distinct, u64::from(COUNT));

    // Every fifth trade was late.
    let late: u64 = conn
        .query_row("SELECT COUNT(*) FROM trades WHERE late = 1", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(late, u64::from(COUNT).div_ceil(5));

    // Known issuers were enriched from the reference table.
    let unenriched: u64 = conn
        .query_row(
            "SELECT COUNT(*) FROM trades WHERE sector IS NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(unenriched, 0);

    let msft_sector: String = conn
        .query_row(
            "SELECT sector FROM trades WHERE issuer = 'Microsoft' LIMIT 1",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(msft_sector, "Technology");

    cleanup_db(&db);
}

#[test]
fn malformed_lines_do_not_abort_the_feed() {
    init_test_tracing();

    let db = temp_db("malformed");
    cleanup_db(&db);

    let mut lines = trade_lines(10);
    lines.insert(3, "not json at all".to_string());
    lines.insert(7, "{\"control_id\": \"missing-everything\"}".to_string());

    let (addr, feed) = spawn_feed(lines);

    let pipeline = Pipeline::spawn(PipelineConfig {
        feed_addr: addr,
        db_path: db.clone(),
        sinks: 1,
        batch_size: 4,
        ..PipelineConfig::default()
    })
    .expect("pipeline spawns");

    let stats = pipeline.join().expect("pipeline completes");
    feed.join().expect("feed thread");

    assert_eq!(stats.ingested, 10);
    assert_eq!(stats.inserted, 10);
    assert_eq!(stats.parse_errors, 2);

    cleanup_db(&db);
}

#[test]
fn unknown_issuer_rows_have_null_reference_data() {
    init_test_tracing();

    let db = temp_db("unknown-issuer");
    cleanup_db(&db);

    let mut trade = make_trade(0);
    trade.issuer = "Acme Widgets".to_string();
    let lines = vec![serde_json::to_string(&trade).unwrap()];

    let (addr, feed) = spawn_feed(lines);

    let pipeline = Pipeline::spawn(PipelineConfig {
        feed_addr: addr,
        db_path: db.clone(),
        sinks: 1,
        batch_size: 16,
        ..PipelineConfig::default()
    })
    .expect("pipeline spawns");

    let stats = pipeline.join().expect("pipeline completes");
    feed.join().expect("feed thread");
    assert_eq!(stats.inserted, 1);

    let conn = Connection::open(&db).unwrap();
    let (sector, rating): (Option<String>, Option<String>) = conn
        .query_row("SELECT sector, rating FROM trades", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(sector, None);
    assert_eq!(rating, None);

    cleanup_db(&db);
}

#[test]
fn shutdown_stops_an_open_ended_feed() {
    init_test_tracing();

    let db = temp_db("shutdown");
    cleanup_db(&db);

    // A feed that sends a few records and then goes quiet without closing.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        for line in trade_lines(5) {
            conn.write_all(line.as_bytes()).expect("write line");
            conn.write_all(b"\n").expect("write newline");
        }
        // Hold the connection open well past the test's lifetime.
        thread::sleep(Duration::from_secs(60));
    });

    let pipeline = Pipeline::spawn(PipelineConfig {
        feed_addr: addr,
        db_path: db.clone(),
        sinks: 1,
        batch_size: 2,
        ..PipelineConfig::default()
    })
    .expect("pipeline spawns");

    // Give the feed time to deliver, then stop.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while pipeline.ingested() < 5 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pipeline.ingested(), 5);

    let stats = pipeline.shutdown().expect("shutdown completes");
    assert_eq!(stats.ingested, 5);
    assert_eq!(stats.inserted, 5);

    cleanup_db(&db);
}

#[test]
fn many_sinks_preserve_every_record() {
    init_test_tracing();

    const COUNT: u32 = 1200;
    let db = temp_db("many-sinks");
    cleanup_db(&db);

    let (addr, feed) = spawn_feed(trade_lines(COUNT));

    let pipeline = Pipeline::spawn(PipelineConfig {
        feed_addr: addr,
        db_path: db.clone(),
        sinks: 4,
        batch_size: 32,
        ..PipelineConfig::default()
    })
    .expect("pipeline spawns");

    let stats = pipeline.join().expect("pipeline completes");
    feed.join().expect("feed thread");

    assert_eq!(stats.ingested, u64::from(COUNT));
    assert_eq!(stats.inserted, u64::from(COUNT));

    let conn = Connection::open(&db).unwrap();
    let distinct: u64 = conn
        .query_row("SELECT COUNT(DISTINCT control_id) FROM trades", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(distinct, u64::from(COUNT));

    cleanup_db(&db);
}
