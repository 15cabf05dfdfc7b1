use config::load_config_from;
use config::shared::{DestinationConfig, ReplicatorConfig, TableSelection};
use dynamodb::DynamoDbSource;
use etl::destination::ConcurrentSink;
use etl::destination::Sink;
use etl::destination::stdout::StdoutSink;
use etl::pipeline::Pipeline;
use etl::source::SourceReader;
use etl::state::{CheckpointStore, MemoryCheckpointStore};
use postgres::{PostgresCheckpointStore, PostgresSink};
use secrecy::ExposeSecret;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::error::{ReplicatorError, ReplicatorResult};

// Statically dispatches pipeline creation and run over the sink type.
macro_rules! run_pipeline_dispatch {
    ($config:expr, $source:expr, $sink:expr, $checkpoints:expr) => {{
        let pipeline = Pipeline::new($config.pipeline.clone(), $source, $sink, $checkpoints);
        run_pipeline(pipeline, &$config.source.tables).await
    }};
}

/// Resolves the configuration from `--from-config` or, without it, from the other flags.
pub fn load_replicator_config(args: &Args) -> ReplicatorResult<ReplicatorConfig> {
    let config = match &args.from_config {
        Some(directory) => {
            load_config_from::<ReplicatorConfig>(directory).map_err(ReplicatorError::config)?
        }
        None => args.to_config(),
    };

    config.validate().map_err(ReplicatorError::config)?;

    Ok(config)
}

pub async fn start_replicator(config: ReplicatorConfig) -> ReplicatorResult<()> {
    let source = DynamoDbSource::connect(&config.source).await;

    match &config.destination {
        DestinationConfig::Stdout => {
            // Nothing durable to keep positions in, every run restarts at the trim horizon.
            let sink = ConcurrentSink::new(vec![StdoutSink::new()])?;

            run_pipeline_dispatch!(config, source, sink, MemoryCheckpointStore::new())?;
        }
        DestinationConfig::Postgres {
            connection_string,
            pool_size,
            tls,
        } => {
            let connection_string = connection_string.expose_secret();

            let mut members = Vec::with_capacity(*pool_size);
            for _ in 0..*pool_size {
                members.push(PostgresSink::connect(connection_string, tls).await?);
            }
            let sink = ConcurrentSink::new(members)?;
            let checkpoints = PostgresCheckpointStore::connect(connection_string, tls).await?;

            info!(pool_size, "connected to the destination");

            run_pipeline_dispatch!(config, source, sink, checkpoints)?;
        }
    }

    Ok(())
}

async fn run_pipeline<R, S, C>(
    mut pipeline: Pipeline<R, S, C>,
    tables: &TableSelection,
) -> ReplicatorResult<()>
where
    R: SourceReader + Clone + Send + Sync + 'static,
    S: Sink + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pipeline.start(tables).await?;

    // Ctrl+C stops the workers after their in-flight batch.
    let shutdown_tx = pipeline.shutdown_tx();
    let shutdown_handle = tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl+c");
            return;
        }

        warn!("ctrl+c received, shutting down the pipeline");
        shutdown_tx.shutdown();
    });

    let result = pipeline.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("replication finished");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;

    #[test]
    fn flags_are_validated() {
        let args = Args::try_parse_from(["replicator", "--scan-rate", "0"]).unwrap();

        let err = load_replicator_config(&args).unwrap_err();

        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn missing_configuration_directory_is_a_config_error() {
        let args = Args {
            from_config: Some(PathBuf::from("/nonexistent/configuration")),
            ..Args::try_parse_from(["replicator"]).unwrap()
        };

        let err = load_replicator_config(&args).unwrap_err();

        assert!(matches!(err, ReplicatorError::Config(_, _)));
        assert!(err.to_string().contains("does not exist"));
    }
}
