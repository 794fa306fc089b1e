//! Core lock-free MPMC ring buffer algorithm.
//!
//! This module provides a bounded lock-free MPMC (Multi-Producer
//! Multi-Consumer) ring buffer using per-slot sequence numbers for
//! synchronization.
//!
//! # Algorithm
//!
//! The algorithm is Dmitry Vyukov's bounded MPMC queue:
//!
//! - Each slot has an atomic sequence number
//! - Producers CAS `head` to claim exclusive write positions
//! - After writing, a producer publishes by setting `slot.seq = pos + 1`
//! - Consumers CAS `tail` to claim exclusive read positions
//! - After reading, a consumer releases by setting `slot.seq = pos + N`
//!
//! Both sides follow the same claim-then-act discipline: win a position on
//! the cursor first, then touch the slot. Payload visibility is carried
//! entirely by the acquire/release pair on the slot's sequence number; the
//! cursor CASes can therefore stay relaxed.
//!
//! # Capacity
//!
//! `N` must be a power of two and at least 2 so that positions map to slot
//! indices with a mask. This is enforced at compile time via
//! [`CapacityCheck`].

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A slot in the MPMC ring buffer with a sequence number for synchronization.
#[repr(C)]
#[repr(align(64))] // Each slot on its own cache line to avoid false sharing
pub struct Slot<T> {
    /// Sequence number for synchronization.
    /// - Initial: slot index (0, 1, 2, ..., N-1)
    /// - After producer write: position + 1 (signals "data ready")
    /// - After consumer read: position + N (signals "slot free")
    seq: AtomicUsize,

    /// The actual data stored in this slot. Uninitialized until the first
    /// producer write; initialized/uninitialized state is tracked by `seq`.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    /// Creates a new slot with the given initial sequence number.
    pub(crate) const fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

// SAFETY: Slot is Sync because:
// - seq is AtomicUsize (inherently Sync)
// - value is protected by the sequence number protocol
unsafe impl<T: Send> Sync for Slot<T> {}
unsafe impl<T: Send> Send for Slot<T> {}

/// Producer-side state: head index for slot claiming.
#[repr(C)]
#[repr(align(64))]
pub struct ProducerState {
    /// Next position a producer will attempt to claim.
    /// Producers race to advance this via CAS.
    pub(crate) head: AtomicUsize,
}

impl ProducerState {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
        }
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer-side state: tail index for slot claiming.
#[repr(C)]
#[repr(align(64))]
pub struct ConsumerState {
    /// Next position a consumer will attempt to claim.
    /// Consumers race to advance this via CAS.
    pub(crate) tail: AtomicUsize,
}

impl ConsumerState {
    pub(crate) const fn new() -> Self {
        Self {
            tail: AtomicUsize::new(0),
        }
    }
}

impl Default for ConsumerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile-time capacity validation.
///
/// Referencing [`CapacityCheck::OK`] forces evaluation during
/// monomorphization, so an invalid `N` is a build error rather than a
/// runtime surprise.
pub(crate) struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion that capacity is a power of two and at least 2.
    pub(crate) const OK: () = assert!(
        N >= 2 && N.is_power_of_two(),
        "Queue capacity must be a power of two and at least 2"
    );
}

/// Core MPMC ring buffer structure.
#[repr(C)]
pub struct Ring<T, const N: usize> {
    /// Producer state (head index for claiming).
    pub(crate) producer: ProducerState,

    /// Consumer state (tail index for claiming).
    pub(crate) consumer: ConsumerState,

    /// Ring buffer slots with per-slot sequence numbers.
    pub(crate) buffer: [Slot<T>; N],
}

impl<T, const N: usize> Ring<T, N> {
    /// Creates a fully initialized ring: cursors at zero, each slot's
    /// sequence set to its index.
    pub(crate) fn new() -> Self {
        let () = CapacityCheck::<N>::OK;
        Self {
            producer: ProducerState::new(),
            consumer: ConsumerState::new(),
            buffer: std::array::from_fn(Slot::new),
        }
    }

    /// Attempts to push an item onto the queue.
    ///
    /// Lock-free: any number of producers may call this concurrently.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the item was published
    /// - `Err(item)` if the queue was observed full; the item is handed back
    ///   untouched so the caller can retry
    #[inline]
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        loop {
            let pos = self.producer.head.load(Ordering::Relaxed);
            let slot = &self.buffer[pos & (N - 1)];

            let seq = slot.seq.load(Ordering::Acquire);

            // Signed distance between the slot's sequence and our position.
            // The signed interpretation keeps the comparison correct across
            // counter wrap-around.
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                // Slot is free at this position. Try to claim it.
                if self
                    .producer
                    .head
                    .compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: We have exclusive write access because:
                    // - the CAS claimed position `pos` for this producer only
                    // - seq == pos means the consumer has released the slot
                    unsafe {
                        (*slot.value.get()).write(item);
                    }
                    // Publish to the consumer waiting on this position.
                    slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
                // CAS failed: another producer beat us, retry with new head
            } else if diff < 0 {
                // seq < pos: a previous lap's element still occupies this
                // slot. Queue is full.
                return Err(item);
            }
            // diff > 0: head has moved past this position. Another producer
            // took it. Retry with fresh head value.
        }
    }

    /// Attempts to pop an item from the queue.
    ///
    /// Lock-free: any number of consumers may call this concurrently.
    ///
    /// Returns `None` if the queue was observed empty.
    #[inline]
    pub(crate) fn pop(&self) -> Option<T> {
        loop {
            let pos = self.consumer.tail.load(Ordering::Relaxed);
            let slot = &self.buffer[pos & (N - 1)];

            let seq = slot.seq.load(Ordering::Acquire);

            // A slot holds data for position `pos` when seq == pos + 1.
            let diff = seq.wrapping_sub(pos.wrapping_add(1)) as isize;

            if diff == 0 {
                // Data is ready here. Try to claim the read.
                if self
                    .consumer
                    .tail
                    .compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: We have exclusive read access because:
                    // - the CAS claimed position `pos` for this consumer only
                    // - the acquire load of seq == pos + 1 synchronizes with
                    //   the producer's release store, so the write is visible
                    let item = unsafe { (*slot.value.get()).assume_init_read() };
                    // Release the slot to the producer on the next lap.
                    slot.seq.store(pos.wrapping_add(N), Ordering::Release);
                    return Some(item);
                }
                // CAS failed: another consumer beat us, retry with new tail
            } else if diff < 0 {
                // Nothing published for this position yet. Queue is empty.
                return None;
            }
            // diff > 0: tail has moved past this position. Another consumer
            // took it. Retry with fresh tail value.
        }
    }
}

impl<T, const N: usize> Drop for Ring<T, N> {
    fn drop(&mut self) {
        let head = *self.producer.head.get_mut();
        let tail = *self.consumer.tail.get_mut();
        // Drop all initialized but unconsumed items in [tail, head).
        // The sequence check skips slots a producer claimed but never
        // finished writing.
        for pos in tail..head {
            let slot = &mut self.buffer[pos & (N - 1)];
            let seq = *slot.seq.get_mut();
            // Slot is fully written when seq == pos + 1
            if seq == pos.wrapping_add(1) {
                // SAFETY: we have &mut self (exclusive access) and the
                // sequence number confirms the write completed.
                unsafe {
                    slot.value.get_mut().assume_init_drop();
                }
            }
        }
    }
}

// SAFETY: Ring is Send because all fields are Send.
unsafe impl<T: Send, const N: usize> Send for Ring<T, N> {}

// SAFETY: Ring is Sync because concurrent access is mediated by atomics:
// - Producers synchronize via CAS on head, consumers via CAS on tail
// - Per-slot sequence numbers provide producer-consumer synchronization
unsafe impl<T: Send, const N: usize> Sync for Ring<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_thread() {
        let ring: Ring<i32, 8> = Ring::new();

        assert!(ring.push(42).is_ok());
        assert!(ring.push(7).is_ok());

        assert_eq!(ring.pop(), Some(42));
        assert_eq!(ring.pop(), Some(7));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_full_capacity() {
        let ring: Ring<i32, 4> = Ring::new();

        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert!(ring.push(3).is_ok());
        assert!(ring.push(4).is_ok());

        // Should be full now
        assert_eq!(ring.push(5), Err(5));

        // Pop one, should be able to push again
        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(5).is_ok());
        assert_eq!(ring.push(6), Err(6)); // Full again
    }

    #[test]
    fn test_wraparound() {
        let ring: Ring<i32, 4> = Ring::new();

        for i in 0..10 {
            assert!(ring.push(i).is_ok());
            assert_eq!(ring.pop(), Some(i));
        }
    }

    #[test]
    fn test_min_capacity() {
        let ring: Ring<u64, 2> = Ring::new();

        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert_eq!(ring.push(3), Err(3));

        assert_eq!(ring.pop(), Some(1));
        assert!(ring.push(3).is_ok());
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_failed_pop_leaves_queue_intact() {
        let ring: Ring<i32, 4> = Ring::new();

        assert_eq!(ring.pop(), None);
        assert!(ring.push(9).is_ok());
        assert_eq!(ring.pop(), Some(9));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_multiple_producers() {
        let ring: Arc<Ring<u64, 64>> = Arc::new(Ring::new());
        let num_producers = 4;
        let items_per_producer = 10;

        let mut handles = vec![];

        for p in 0..num_producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..items_per_producer {
                    let value = (p * 100 + i) as u64;
                    loop {
                        if ring.push(value).is_ok() {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut items = vec![];
        while let Some(item) = ring.pop() {
            items.push(item);
        }

        assert_eq!(items.len(), num_producers * items_per_producer);

        for p in 0..num_producers {
            for i in 0..items_per_producer {
                let expected = (p * 100 + i) as u64;
                assert!(items.contains(&expected), "Missing value {expected}");
            }
        }
    }

    #[test]
    fn test_multiple_consumers() {
        let ring: Arc<Ring<u64, 64>> = Arc::new(Ring::new());
        let total: u64 = 40;

        for i in 0..total {
            ring.push(i).unwrap();
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                let mut drained = vec![];
                while let Some(item) = ring.pop() {
                    drained.push(item);
                }
                drained
            }));
        }

        let mut items: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        items.sort_unstable();

        // Every value drained exactly once.
        assert_eq!(items, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        let ring: Arc<Ring<u64, 32>> = Arc::new(Ring::new());
        let num_producers: u64 = 4;
        let items_per_producer: u64 = 1000;
        let total = num_producers * items_per_producer;

        let consumed = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let sum = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = vec![];

        for p in 0..num_producers {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                for i in 0..items_per_producer {
                    let value = p * items_per_producer + i;
                    loop {
                        if ring.push(value).is_ok() {
                            break;
                        }
                        thread::yield_now();
                    }
                }
            }));
        }

        for _ in 0..4 {
            let ring = Arc::clone(&ring);
            let consumed = Arc::clone(&consumed);
            let sum = Arc::clone(&sum);
            handles.push(thread::spawn(move || {
                while consumed.load(Ordering::Relaxed) < total {
                    if let Some(item) = ring.pop() {
                        sum.fetch_add(item, Ordering::Relaxed);
                        consumed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        thread::yield_now();
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(consumed.load(Ordering::Relaxed), total);
        // Sum of 0..total = total * (total - 1) / 2
        assert_eq!(sum.load(Ordering::Relaxed), total * (total - 1) / 2);
    }

    #[test]
    fn test_drop_releases_unconsumed() {
        use std::sync::atomic::AtomicUsize;

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        DROPS.store(0, Ordering::Relaxed);
        {
            let ring: Ring<Counted, 8> = Ring::new();
            assert!(ring.push(Counted).is_ok());
            assert!(ring.push(Counted).is_ok());
            assert!(ring.push(Counted).is_ok());
            drop(ring.pop()); // one dropped by the consumer
        }
        // The remaining two dropped when the ring was dropped.
        assert_eq!(DROPS.load(Ordering::Relaxed), 3);
    }
}
