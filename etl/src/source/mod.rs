//! Source store contract and an in-memory implementation.

pub mod base;
pub mod memory;

pub use base::*;
