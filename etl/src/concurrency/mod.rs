//! Concurrency primitives shared by the replication workers.
//!
//! The [`shutdown`] module broadcasts a cooperative shutdown to every worker, [`rate_limiter`]
//! throttles snapshot scans to the configured capacity and [`retry`] provides the fixed backoff
//! combinator used around source reads.

pub mod rate_limiter;
pub mod retry;
pub mod shutdown;
