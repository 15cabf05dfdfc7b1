use config::shared::PipelineConfig;

/// Returns a pipeline configuration with every interval shortened for tests.
///
/// The scan rate is high enough for the rate limiter to never wait.
pub fn fast_pipeline_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.scan.max_rate = 10_000.0;
    config.scan.page_size = 2;
    config.stream.poll_interval_ms = 10;
    config.stream.partition_discovery_interval_ms = 20;
    config.retry.backoff_ms = 10;

    config
}
