//! Feed pipeline runtime: reader and sink threads over the MPMC queue.
//!
//! # Architecture
//!
//! The pipeline spawns:
//! - **Reader thread**: connects to the TCP feed, parses and enriches
//!   trades, and pushes them onto the queue.
//! - **Sink threads** (one or more): drain the queue and write batched
//!   inserts into the SQLite trade store, each over its own connection.
//!
//! Shutdown is coordinated with a shared atomic flag plus a feed-done flag:
//! the queue itself has no close state. When the feed ends, sinks drain the
//! queue to empty and exit.
//!
//! # Example
//!
//! ```ignore
//! use tape::feed::pipeline::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig {
//!     feed_addr: "127.0.0.1:5555".parse().unwrap(),
//!     db_path: "trades.db".into(),
//!     ..PipelineConfig::default()
//! };
//!
//! let pipeline = Pipeline::spawn(config)?;
//! let stats = pipeline.join()?;
//! println!("ingested {} inserted {}", stats.ingested, stats.inserted);
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::feed::ingest::{self, FeedReader, IngestError, IngestStats};
use crate::feed::issuers::{self, IssuerTable};
use crate::feed::sink::{SinkError, TradeSink};
use crate::feed::types::EnrichedTrade;
use crate::sync::mpmc::{self, Consumer};
use crate::trace::{debug, info, warn};

/// Capacity of the trade queue between the reader and the sinks.
pub const FEED_QUEUE_CAPACITY: usize = 1024;

/// Default number of sink threads.
pub const DEFAULT_SINKS: usize = 1;

/// Default rows per insert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Configuration for the feed pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Address of the upstream TCP feed.
    pub feed_addr: SocketAddr,
    /// Path of the SQLite trade store.
    pub db_path: PathBuf,
    /// Number of sink threads (each with its own connection).
    pub sinks: usize,
    /// Maximum rows per insert transaction.
    pub batch_size: usize,
    /// Connection attempts before giving up on the feed.
    pub connect_attempts: u32,
    /// Delay between connection attempts.
    pub connect_retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            feed_addr: SocketAddr::from(([127, 0, 0, 1], 5555)),
            db_path: PathBuf::from("trades.db"),
            sinks: DEFAULT_SINKS,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_attempts: 10,
            connect_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Error spawning or running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("failed to load issuer table: {0}")]
    Issuers(#[from] rusqlite::Error),
    #[error("pipeline config: {0}")]
    Config(String),
}

/// Counters from a completed pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// Trades parsed from the feed and queued.
    pub ingested: u64,
    /// Rows written to the trade store.
    pub inserted: u64,
    /// Malformed feed lines skipped.
    pub parse_errors: u64,
    /// Trades queued despite a failing CUSIP check digit.
    pub bad_cusips: u64,
}

/// Handle to a running pipeline.
///
/// Call [`Pipeline::join`] to wait for the feed to end, or
/// [`Pipeline::shutdown`] to stop early. Dropping the handle signals
/// shutdown but does not wait.
pub struct Pipeline {
    shutdown_flag: Arc<AtomicBool>,
    feed_done: Arc<AtomicBool>,
    ingested: Arc<AtomicU64>,
    inserted: Arc<AtomicU64>,
    reader_handle: Option<JoinHandle<Result<IngestStats, IngestError>>>,
    sink_handles: Vec<JoinHandle<Result<u64, SinkError>>>,
}

impl Pipeline {
    /// Spawns the reader and sink threads.
    ///
    /// Fails fast: the feed connection, the trade store, and the issuer
    /// table are all opened before any thread starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed is unreachable, the database cannot be
    /// opened, or the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if thread spawning fails.
    pub fn spawn(config: PipelineConfig) -> Result<Self, PipelineError> {
        if config.sinks == 0 {
            return Err(PipelineError::Config("at least one sink required".into()));
        }
        if config.batch_size == 0 {
            return Err(PipelineError::Config("batch size must be nonzero".into()));
        }

        info!(
            feed_addr = %config.feed_addr,
            db_path = %config.db_path.display(),
            sinks = config.sinks,
            "pipeline starting"
        );

        // Open sink connections up front so a bad path fails before we
        // touch the network.
        let mut sinks = Vec::with_capacity(config.sinks);
        for _ in 0..config.sinks {
            sinks.push(TradeSink::open(&config.db_path)?);
        }

        // Seed and load issuer reference data over a dedicated connection.
        let issuers = {
            let conn = rusqlite::Connection::open(&config.db_path)
                .map_err(PipelineError::Issuers)?;
            issuers::seed(&conn)?;
            IssuerTable::load(&conn)?
        };
        debug!(issuers = issuers.len(), "issuer table loaded");

        let stream = ingest::connect(
            config.feed_addr,
            config.connect_attempts,
            config.connect_retry_delay,
        )?;

        let (producer, consumer) = mpmc::channel::<EnrichedTrade, FEED_QUEUE_CAPACITY>();

        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let feed_done = Arc::new(AtomicBool::new(false));
        let ingested = Arc::new(AtomicU64::new(0));
        let inserted = Arc::new(AtomicU64::new(0));

        debug!("spawning feed reader thread");
        let reader = FeedReader::new(
            stream,
            producer,
            issuers,
            Arc::clone(&shutdown_flag),
            Arc::clone(&ingested),
        )?;
        let reader_done = Arc::clone(&feed_done);
        let reader_handle = thread::Builder::new()
            .name("tape-feed".into())
            .spawn(move || {
                info!("feed reader started");
                let result = reader.run();
                reader_done.store(true, Ordering::Release);
                info!("feed reader exiting");
                result
            })
            .expect("failed to spawn feed reader thread");

        let mut sink_handles = Vec::with_capacity(config.sinks);
        for (i, sink) in sinks.into_iter().enumerate() {
            debug!(sink = i, "spawning sink thread");
            let consumer = consumer.clone();
            let done = Arc::clone(&feed_done);
            let inserted = Arc::clone(&inserted);
            let batch_size = config.batch_size;
            let handle = thread::Builder::new()
                .name(format!("tape-sink-{i}"))
                .spawn(move || {
                    info!("sink thread started");
                    let result = run_sink(sink, consumer, done, inserted, batch_size);
                    info!("sink thread exiting");
                    result
                })
                .expect("failed to spawn sink thread");
            sink_handles.push(handle);
        }

        info!("pipeline started");

        Ok(Self {
            shutdown_flag,
            feed_done,
            ingested,
            inserted,
            reader_handle: Some(reader_handle),
            sink_handles,
        })
    }

    /// Whether the feed has ended (sinks may still be draining).
    #[must_use]
    pub fn feed_finished(&self) -> bool {
        self.feed_done.load(Ordering::Acquire)
    }

    /// Returns a clone of the shutdown flag for external signal handling.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown_flag)
    }

    /// Trades queued so far.
    #[must_use]
    pub fn ingested(&self) -> u64 {
        self.ingested.load(Ordering::Relaxed)
    }

    /// Rows written so far.
    #[must_use]
    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Waits for the feed to end and the sinks to drain, then returns the
    /// run's counters.
    ///
    /// # Errors
    ///
    /// Returns the first reader or sink error; remaining threads are still
    /// joined.
    pub fn join(mut self) -> Result<PipelineStats, PipelineError> {
        self.join_inner()
    }

    /// Initiates shutdown and waits for all threads to exit.
    ///
    /// The reader stops promptly; sinks flush what they already hold.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::join`].
    pub fn shutdown(mut self) -> Result<PipelineStats, PipelineError> {
        info!("pipeline shutdown initiated");
        self.shutdown_flag.store(true, Ordering::Release);
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<PipelineStats, PipelineError> {
        let mut stats = PipelineStats::default();
        let mut first_error: Option<PipelineError> = None;

        if let Some(handle) = self.reader_handle.take() {
            debug!("waiting for feed reader to exit");
            match handle.join() {
                Ok(Ok(ingest_stats)) => {
                    stats.ingested = ingest_stats.ingested;
                    stats.parse_errors = ingest_stats.parse_errors;
                    stats.bad_cusips = ingest_stats.bad_cusips;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "feed reader failed");
                    // Sinks watch feed_done; make sure they still exit.
                    self.feed_done.store(true, Ordering::Release);
                    first_error = Some(e.into());
                }
                Err(_) => {
                    self.feed_done.store(true, Ordering::Release);
                    first_error = Some(PipelineError::Config("feed reader panicked".into()));
                }
            }
        }

        for handle in self.sink_handles.drain(..) {
            debug!("waiting for sink thread to exit");
            match handle.join() {
                Ok(Ok(rows)) => stats.inserted += rows,
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e.into());
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error =
                            Some(PipelineError::Config("sink thread panicked".into()));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            ingested = stats.ingested,
            inserted = stats.inserted,
            "pipeline complete"
        );
        Ok(stats)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Signal shutdown if not already done. Threads are detached if the
        // caller never joined.
        self.shutdown_flag.store(true, Ordering::Release);
    }
}

/// Sink thread body: drain the queue into batched inserts until the feed is
/// done and the queue is empty.
fn run_sink(
    mut sink: TradeSink,
    consumer: Consumer<EnrichedTrade, FEED_QUEUE_CAPACITY>,
    feed_done: Arc<AtomicBool>,
    inserted: Arc<AtomicU64>,
    batch_size: usize,
) -> Result<u64, SinkError> {
    let mut batch: Vec<EnrichedTrade> = Vec::with_capacity(batch_size);
    let mut total: u64 = 0;
    let mut idle = 0u32;

    loop {
        match consumer.pop() {
            Some(item) => {
                idle = 0;
                batch.push(item);
                if batch.len() >= batch_size {
                    total += flush(&mut sink, &mut batch, &inserted)?;
                }
            }
            None => {
                // Flush partial batches while the feed is quiet so rows
                // become visible without waiting for a full batch.
                if !batch.is_empty() {
                    total += flush(&mut sink, &mut batch, &inserted)?;
                }
                if feed_done.load(Ordering::Acquire) {
                    // Recheck once: the reader may have published between
                    // the failed pop and the flag read.
                    match consumer.pop() {
                        Some(item) => {
                            batch.push(item);
                            continue;
                        }
                        None => return Ok(total),
                    }
                }
                idle += 1;
                if idle < 64 {
                    thread::yield_now();
                } else {
                    thread::sleep(Duration::from_micros(50));
                }
            }
        }
    }
}

fn flush(
    sink: &mut TradeSink,
    batch: &mut Vec<EnrichedTrade>,
    inserted: &AtomicU64,
) -> Result<u64, SinkError> {
    let rows = sink.insert_batch(batch)? as u64;
    inserted.fetch_add(rows, Ordering::Relaxed);
    batch.clear();
    Ok(rows)
}
