//! TCP feed reader: line-delimited JSON trades pushed onto the queue.
//!
//! Responsibilities:
//! - Connect to the upstream feed and read it without blocking forever, so
//!   a shutdown request is honored promptly.
//! - Split the byte stream into lines, parse each line as a [`Trade`],
//!   enrich it, and push it onto the MPMC queue.
//! - Absorb backpressure from a full queue with a yield/short-sleep loop;
//!   the queue itself never waits.
//!
//! Malformed lines are counted and skipped rather than aborting the feed.
//! EOF from the peer ends the feed.

use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::feed::issuers::IssuerTable;
use crate::feed::types::{EnrichedTrade, Trade, cusip};
use crate::sync::mpmc::Producer;
use crate::trace::{debug, info, warn};

/// Poll token for the feed stream.
const FEED: Token = Token(0);

/// Poll timeout; bounds how long a shutdown request can go unnoticed.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Consecutive full-queue failures before the reader switches from yielding
/// to sleeping.
const SPIN_LIMIT: u32 = 64;

/// Sleep applied once the queue has stayed full past [`SPIN_LIMIT`].
const FULL_BACKOFF: Duration = Duration::from_micros(50);

/// Error reading the feed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to connect to feed at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("feed I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters exposed by a finished feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Trades parsed and queued.
    pub ingested: u64,
    /// Lines that failed to parse and were skipped.
    pub parse_errors: u64,
    /// Queued trades whose CUSIP failed its check digit.
    pub bad_cusips: u64,
}

/// Connects to the feed, retrying a refused connection.
///
/// The returned stream is non-blocking, ready for poll registration.
///
/// # Errors
///
/// Returns [`IngestError::Connect`] once the attempts are exhausted.
pub fn connect(
    addr: SocketAddr,
    attempts: u32,
    retry_delay: Duration,
) -> Result<TcpStream, IngestError> {
    let mut last_err = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            std::thread::sleep(retry_delay);
        }
        match std::net::TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_nonblocking(true)?;
                info!(%addr, "connected to feed");
                return Ok(TcpStream::from_std(stream));
            }
            Err(e) => {
                debug!(%addr, attempt, error = %e, "feed connect failed");
                last_err = Some(e);
            }
        }
    }
    Err(IngestError::Connect {
        addr,
        source: last_err
            .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "no connection attempts")),
    })
}

/// Reads line-delimited JSON trades from a TCP feed and queues them.
pub struct FeedReader<const N: usize> {
    stream: TcpStream,
    poll: Poll,
    events: Events,
    producer: Producer<EnrichedTrade, N>,
    issuers: IssuerTable,
    shutdown: Arc<AtomicBool>,
    ingested: Arc<AtomicU64>,
    /// Bytes received but not yet terminated by a newline.
    pending: Vec<u8>,
    stats: IngestStats,
}

impl<const N: usize> FeedReader<N> {
    /// Creates a reader over an already-connected non-blocking stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll instance cannot be created or the stream
    /// cannot be registered.
    pub fn new(
        mut stream: TcpStream,
        producer: Producer<EnrichedTrade, N>,
        issuers: IssuerTable,
        shutdown: Arc<AtomicBool>,
        ingested: Arc<AtomicU64>,
    ) -> Result<Self, IngestError> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, FEED, Interest::READABLE)?;

        Ok(Self {
            stream,
            poll,
            events: Events::with_capacity(16),
            producer,
            issuers,
            shutdown,
            ingested,
            pending: Vec::with_capacity(4096),
            stats: IngestStats::default(),
        })
    }

    /// Runs the read loop until the feed closes or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure; a clean EOF is not an error.
    pub fn run(mut self) -> Result<IngestStats, IngestError> {
        let mut buf = [0u8; 8192];

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                info!("feed reader shutting down");
                return Ok(self.stats);
            }

            self.poll.poll(&mut self.events, Some(POLL_TIMEOUT))?;

            let mut readable = false;
            for event in self.events.iter() {
                if event.token() == FEED && (event.is_readable() || event.is_read_closed()) {
                    readable = true;
                }
            }
            if !readable {
                continue;
            }

            // Drain the socket until it would block.
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => {
                        info!(
                            ingested = self.stats.ingested,
                            parse_errors = self.stats.parse_errors,
                            "feed closed"
                        );
                        self.flush_pending();
                        return Ok(self.stats);
                    }
                    Ok(n) => {
                        self.pending.extend_from_slice(&buf[..n]);
                        self.process_lines();
                        if self.shutdown.load(Ordering::Acquire) {
                            return Ok(self.stats);
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(IngestError::Io(e)),
                }
            }
        }
    }

    /// Extracts and handles every complete line in the pending buffer.
    fn process_lines(&mut self) {
        while let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(nl + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop(); // trailing newline
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                self.handle_line(&line);
            }
        }
    }

    /// The feed closed mid-line; a non-terminated trailing record is still
    /// a complete JSON object, so try it.
    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        let trade: Trade = match serde_json::from_slice(line) {
            Ok(trade) => trade,
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(error = %e, "skipping malformed feed line");
                return;
            }
        };

        if !cusip::is_valid(&trade.cusip) {
            self.stats.bad_cusips += 1;
            warn!(cusip = %trade.cusip, control_id = %trade.control_id, "CUSIP check digit mismatch");
        }

        self.enqueue(trade.enrich(&self.issuers));
    }

    /// Pushes one record, yielding and then sleeping while the queue stays
    /// full. Gives up only on shutdown.
    fn enqueue(&mut self, item: EnrichedTrade) {
        let mut item = item;
        let mut failures = 0u32;
        loop {
            match self.producer.push(item) {
                Ok(()) => {
                    self.stats.ingested += 1;
                    self.ingested.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(returned) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        // Dropping the record is acceptable on shutdown.
                        return;
                    }
                    item = returned;
                    failures += 1;
                    if failures < SPIN_LIMIT {
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(FULL_BACKOFF);
                    }
                }
            }
        }
    }
}
