use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`pipeline.scan.max_rate` must be a positive number")]
    ScanRateNotPositive,
    #[error("`pipeline.scan.page_size` cannot be zero")]
    ScanPageSizeZero,
    #[error("`destination.postgres.pool_size` cannot be zero")]
    PoolSizeZero,
    #[error("`pipeline.retry.max_attempts` cannot be zero")]
    RetryMaxAttemptsZero,
    #[error("`source.tables.names` must list at least one table")]
    EmptyTableList,
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
