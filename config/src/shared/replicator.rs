use serde::Deserialize;

use crate::Config;
use crate::shared::{DestinationConfig, PipelineConfig, SourceConfig, ValidationError};

/// Complete configuration of the replicator.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking secrets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplicatorConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.destination.validate()?;
        self.pipeline.validate()
    }
}

impl Config for ReplicatorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["source.tables.names"];
}
