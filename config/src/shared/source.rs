use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Tables replicated from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSelection {
    /// Every table the source lists.
    #[default]
    All,
    /// Only the named tables, in this order.
    Names(Vec<String>),
}

/// Connection settings of the source store.
///
/// Credentials come from the standard AWS provider chain (environment, profile, instance role)
/// and are never stored in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Overrides the regional endpoint, e.g. a local emulator.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub tables: TableSelection,
}

impl SourceConfig {
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let TableSelection::Names(names) = &self.tables
            && names.is_empty()
        {
            return Err(ValidationError::EmptyTableList);
        }

        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            tables: TableSelection::default(),
        }
    }
}

fn default_region() -> String {
    SourceConfig::DEFAULT_REGION.to_owned()
}
