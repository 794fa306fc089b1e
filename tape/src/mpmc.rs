//! Core MPMC (Multi-Producer Multi-Consumer) queue primitives.
//!
//! This module contains a bounded lock-free MPMC ring buffer algorithm.
//! Any number of producers and any number of consumers can safely operate
//! on the queue concurrently.
//!
//! Used by:
//! - [`crate::sync::mpmc`] - In-process queues over heap allocation

pub(crate) mod ring;
