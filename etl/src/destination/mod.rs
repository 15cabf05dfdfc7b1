//! Destination abstractions for replicated tables.
//!
//! This module provides the [`Sink`] trait, the [`concurrent::ConcurrentSink`] pool that
//! parallelizes single-row writes while keeping per-key order, and simple sinks used for
//! development and tests.

mod base;
pub mod concurrent;
pub mod memory;
pub mod stdout;

pub use base::Sink;
pub use concurrent::ConcurrentSink;
