//! Synchronization primitives for in-process (inter-thread) communication.

pub mod mpmc;
