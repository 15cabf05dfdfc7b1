//! Tracing setup for the replicator binary and for tests.

use std::io;
use std::sync::Once;

use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_log::log_tracer::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to bridge `log` records into tracing: {0}")]
    Log(#[from] SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Flushes buffered log lines when dropped.
///
/// Keep it alive until the end of `main`, logs emitted after it is dropped may be lost.
#[must_use = "logs are flushed when the flusher is dropped"]
#[derive(Debug)]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Installs the global subscriber of a binary named `app_name`.
///
/// Without `RUST_LOG`, `app_name` and the `etl` crate log at `info`. Lines are written to stderr
/// by a background thread, stdout being reserved for the SQL printed by the stdout sink. `log`
/// records of dependencies are forwarded to tracing.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let (writer, guard) = tracing_appender::non_blocking(io::stderr());
    let subscriber = tracing_subscriber::registry()
        .with(env_filter(&format!("{app_name}=info,etl=info")))
        .with(fmt::layer().with_writer(writer));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a subscriber writing through the test harness, at most once per process.
///
/// Nothing is logged unless `RUST_LOG` is set.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter("off"))
            .with(fmt::layer().with_test_writer());

        // Another test harness may have installed a subscriber already.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
