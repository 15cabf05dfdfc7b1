use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Phases run for every selected table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PhasesConfig {
    /// Derive the schema and create the destination table.
    pub schema: bool,
    /// Bulk load a snapshot of the table.
    pub data: bool,
    /// Follow the change stream.
    pub changes: bool,
}

impl Default for PhasesConfig {
    fn default() -> Self {
        Self {
            schema: true,
            data: true,
            changes: true,
        }
    }
}

/// Snapshot scan settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ScanConfig {
    /// Maximum read capacity units consumed per second and table.
    pub max_rate: f64,
    /// Maximum number of items per scan page.
    pub page_size: usize,
}

impl ScanConfig {
    pub const DEFAULT_MAX_RATE: f64 = 25.0;

    pub const DEFAULT_PAGE_SIZE: usize = 100;
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_rate: Self::DEFAULT_MAX_RATE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// Change stream polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StreamConfig {
    /// Pause before polling a partition that returned no records.
    pub poll_interval_ms: u64,
    /// Interval between two lookups of newly created partitions.
    pub partition_discovery_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            partition_discovery_interval_ms: 10_000,
        }
    }
}

/// Retry settings of source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryConfig {
    /// Attempts per read, the first one included.
    pub max_attempts: u32,
    /// Fixed delay between two attempts.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

/// How source attribute names become column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnNaming {
    #[default]
    Preserve,
    LowerCase,
}

/// How source items are laid out in destination tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    /// One column per attribute and value type, added as new attributes show up.
    #[default]
    Columns,
    /// Key columns plus the whole item in a single `data` JSONB column.
    Jsonb,
}

/// Replication pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PipelineConfig {
    pub phases: PhasesConfig,
    pub scan: ScanConfig,
    pub stream: StreamConfig,
    pub retry: RetryConfig,
    pub column_naming: ColumnNaming,
    pub conversion_mode: ConversionMode,
    /// Distribute destination tables by their partition key (Citus).
    pub distributed: bool,
    /// Empty the destination table before loading a snapshot.
    pub truncate_before_snapshot: bool,
    /// Prefix of the checkpoint lease keys, followed by the table name.
    pub checkpoint_lease_prefix: String,
}

impl PipelineConfig {
    pub const DEFAULT_CHECKPOINT_LEASE_PREFIX: &'static str = "dynamodb-to-postgres-";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.scan.max_rate.is_finite() || self.scan.max_rate <= 0.0 {
            return Err(ValidationError::ScanRateNotPositive);
        }

        if self.scan.page_size == 0 {
            return Err(ValidationError::ScanPageSizeZero);
        }

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::RetryMaxAttemptsZero);
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phases: PhasesConfig::default(),
            scan: ScanConfig::default(),
            stream: StreamConfig::default(),
            retry: RetryConfig::default(),
            column_naming: ColumnNaming::default(),
            conversion_mode: ConversionMode::default(),
            distributed: true,
            truncate_before_snapshot: true,
            checkpoint_lease_prefix: Self::DEFAULT_CHECKPOINT_LEASE_PREFIX.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_use_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"scan": {"max_rate": 5.0}, "column_naming": "lower_case"}"#)
                .unwrap();

        assert_eq!(config.scan.max_rate, 5.0);
        assert_eq!(config.scan.page_size, ScanConfig::DEFAULT_PAGE_SIZE);
        assert_eq!(config.column_naming, ColumnNaming::LowerCase);
        assert_eq!(config.conversion_mode, ConversionMode::Columns);
        assert!(config.distributed);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.scan.max_rate = 0.0;
        assert_eq!(config.validate(), Err(ValidationError::ScanRateNotPositive));

        let mut config = PipelineConfig::default();
        config.scan.page_size = 0;
        assert_eq!(config.validate(), Err(ValidationError::ScanPageSizeZero));

        let mut config = PipelineConfig::default();
        config.retry.max_attempts = 0;
        assert_eq!(config.validate(), Err(ValidationError::RetryMaxAttemptsZero));
    }
}
