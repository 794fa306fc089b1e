//! TRACE-style trade feed: ingest, enrichment, and SQL sink.
//!
//! The feed is line-delimited JSON over TCP. [`ingest`] reads and enriches
//! it, [`pipeline`] wires the reader and one or more [`sink`] threads
//! together over the MPMC queue, and [`issuers`] provides the reference
//! data used for enrichment.

pub mod ingest;
pub mod issuers;
pub mod pipeline;
pub mod sink;
pub mod types;
