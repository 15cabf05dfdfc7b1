use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

const fn default_pool_size() -> usize {
    DestinationConfig::DEFAULT_POOL_SIZE
}

/// Where replicated tables are written.
///
/// This intentionally does not implement [`Serialize`] to avoid leaking the connection string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationConfig {
    /// Prints the SQL that would be executed to standard output.
    #[default]
    Stdout,
    /// A Postgres or Citus database.
    Postgres {
        /// libpq-style connection string or URL.
        connection_string: SecretString,
        /// Number of connections writing change stream modifications in parallel.
        #[serde(default = "default_pool_size")]
        pool_size: usize,
        #[serde(default)]
        tls: TlsConfig,
    },
}

impl DestinationConfig {
    pub const DEFAULT_POOL_SIZE: usize = 16;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DestinationConfig::Stdout => Ok(()),
            DestinationConfig::Postgres { pool_size, tls, .. } => {
                if *pool_size == 0 {
                    return Err(ValidationError::PoolSizeZero);
                }

                tls.validate()
            }
        }
    }
}

/// TLS settings of the destination connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded root certificates trusted to sign the server certificate.
    #[serde(default)]
    pub trusted_root_certs: String,
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}
