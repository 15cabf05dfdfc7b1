use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

#[derive(Debug)]
struct Bucket {
    available: f64,
    last_refill: Instant,
}

/// Token bucket limiting the rate at which capacity units are consumed.
///
/// The bucket holds at most `rate` units and starts full. A caller may overdraw it, in which case
/// it waits until the deficit has been refilled. Because scan costs are only known once a page
/// has been read, the wait is paid before the next page rather than the current one.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter allowing `rate` units per second.
    pub fn new(rate: f64) -> EtlResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            bail!(
                ErrorKind::ConfigError,
                "Rate limit must be a positive number",
                format!("got {rate}")
            );
        }

        Ok(Self {
            rate,
            bucket: Mutex::new(Bucket {
                available: rate,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Consumes `permits` units, waiting if the bucket does not hold enough of them.
    pub async fn acquire(&self, permits: u64) {
        let wait = {
            let mut bucket = self.bucket.lock().await;

            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.available = (bucket.available + elapsed * self.rate).min(self.rate);
            bucket.last_refill = now;

            bucket.available -= permits as f64;
            if bucket.available < 0.0 {
                Duration::from_secs_f64(-bucket.available / self.rate)
            } else {
                Duration::ZERO
            }
        };

        if !wait.is_zero() {
            debug!(permits, wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}
