//! Lock-free MPMC queue for in-process (inter-thread) communication.
//!
//! A bounded queue using a heap-allocated ring buffer with per-slot
//! sequence numbers.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (clone for additional producers)
//! - [`Consumer`] - Read end (clone for additional consumers)
//! - Lock-free: no mutexes or syscalls in the hot path
//!
//! # Example
//!
//! ```
//! use tape::sync::mpmc;
//!
//! let (producer, consumer) = mpmc::channel::<u64, 1024>();
//!
//! // Producer thread
//! producer.push(42).expect("Queue full");
//!
//! // Consumer thread
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! # Backoff
//!
//! `push` and `pop` never wait: a full or empty observation is reported
//! immediately and retry policy belongs to the caller. The `_blocking`
//! variants bundle a spin-retry loop with a deadline for callers that want
//! one.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::mpmc::ring::{CapacityCheck, Ring};

/// Timeout specification for blocking operations.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the MPMC queue.
///
/// Clone the handle to add producers; each clone may push from its own
/// thread and all clones push into the same queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]: transfer or clone a handle
/// per thread rather than sharing `&Producer` across threads.
pub struct Producer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    _unsync: PhantomUnsync,
}

/// Read end of the MPMC queue.
///
/// Clone the handle to add consumers; each clone may pop from its own
/// thread and every published item is received by exactly one of them.
///
/// See [`Producer`] for thread safety details (same semantics apply).
pub struct Consumer<T: Send, const N: usize> {
    ring: Arc<Ring<T, N>>,
    _unsync: PhantomUnsync,
}

impl<T: Send, const N: usize> Clone for Producer<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            _unsync: PhantomData,
        }
    }
}

impl<T: Send, const N: usize> Clone for Consumer<T, N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            _unsync: PhantomData,
        }
    }
}

/// Creates a new MPMC channel with the given capacity.
///
/// Returns a `(Producer, Consumer)` pair. Both ends can be cloned and the
/// clones sent to different threads.
///
/// # Compile-time constraints
///
/// `N` must be a power of two and at least 2; other capacities fail to
/// compile.
///
/// # Example
///
/// ```
/// use tape::sync::mpmc;
///
/// let (tx, rx) = mpmc::channel::<String, 16>();
///
/// tx.push("hello".to_string()).unwrap();
/// assert_eq!(rx.pop(), Some("hello".to_string()));
/// ```
#[must_use]
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(Ring::new());

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Send, const N: usize> Producer<T, N> {
    /// Attempts to push an item onto the queue without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue was observed full, handing the item
    /// back so the caller can retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    /// Spins until space is available, then pushes.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` on timeout.
    #[inline]
    pub fn push_blocking(&self, mut item: T, timeout: Timeout) -> Result<(), T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            match self.push(item) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    item = returned;
                    if let Some(dl) = deadline
                        && Instant::now() > dl
                    {
                        return Err(item);
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }
}

impl<T: Send, const N: usize> Consumer<T, N> {
    /// Attempts to pop an item from the queue without waiting.
    ///
    /// Returns `None` if the queue was observed empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        self.ring.pop()
    }

    /// Spins until an item is available, then pops.
    ///
    /// Returns `None` on timeout.
    #[inline]
    #[must_use]
    pub fn pop_blocking(&self, timeout: Timeout) -> Option<T> {
        let deadline = match timeout {
            Timeout::Infinite => None,
            Timeout::Duration(d) => Some(Instant::now() + d),
        };
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if let Some(dl) = deadline
                && Instant::now() > dl
            {
                return None;
            }
            std::hint::spin_loop();
        }
    }
}
