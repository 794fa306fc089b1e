//! Bounded lock-free MPMC queue with a TRACE-style trade feed pipeline.
//!
//! The core of the crate is [`sync::mpmc`]: a fixed-capacity lock-free
//! multi-producer multi-consumer queue built on per-slot sequence numbers.
//! On top of it, [`feed`] implements a small market-data pipeline: a TCP
//! line-delimited JSON ingester that enriches trade records and drains them
//! into a SQLite table.

pub mod feed;
pub mod fmt;
pub mod mpmc;
pub mod sync;

mod trace;

pub use trace::init_tracing;
