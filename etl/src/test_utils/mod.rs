//! Utilities shared by the unit and integration tests of the crate.
//!
//! Tests run against [`crate::source::memory::MemorySource`] and
//! [`crate::destination::memory::MemorySink`], so no live source store or database is needed.
//! The helpers here build items and table descriptions for those in-memory stores, a pipeline
//! configuration with short intervals, and a polling wait for conditions reached asynchronously
//! by workers.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

pub mod item;
pub mod pipeline;
pub mod table;

/// Default timeout of [`wait_until`].
///
/// Chosen empirically, no test condition should take more than a few seconds to be reached.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within [`DEFAULT_WAIT_TIMEOUT`].
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + DEFAULT_WAIT_TIMEOUT;
    while !condition().await {
        if Instant::now() >= deadline {
            panic!("condition not reached within {DEFAULT_WAIT_TIMEOUT:?}");
        }

        sleep(POLL_INTERVAL).await;
    }
}
