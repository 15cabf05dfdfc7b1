use std::str::FromStr;
use std::time::Duration;

use config::shared::TlsConfig;
use etl::error::EtlResult;
use etl::state::CheckpointStore;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tracing::info;

const CREATE_CHECKPOINTS_TABLE: &str = "
    create table if not exists replication_checkpoints (
        lease_key text not null,
        partition_id text not null,
        sequence_number text not null,
        updated_at timestamptz not null default now(),
        primary key (lease_key, partition_id)
    )";

const SELECT_CHECKPOINT: &str = "
    select sequence_number
    from replication_checkpoints
    where lease_key = $1 and partition_id = $2";

const UPSERT_CHECKPOINT: &str = "
    insert into replication_checkpoints (lease_key, partition_id, sequence_number)
    values ($1, $2, $3)
    on conflict (lease_key, partition_id)
    do update set sequence_number = excluded.sequence_number, updated_at = now()";

/// Builds the connection options of the checkpoint pool.
fn connect_options(connection_string: &str, tls: &TlsConfig) -> EtlResult<PgConnectOptions> {
    let ssl_mode = if tls.enabled {
        PgSslMode::VerifyFull
    } else {
        PgSslMode::Prefer
    };

    let mut options = PgConnectOptions::from_str(connection_string)?.ssl_mode(ssl_mode);
    if tls.enabled {
        options = options.ssl_root_cert_from_pem(tls.trusted_root_certs.clone().into_bytes());
    }

    Ok(options)
}

/// Checkpoint store persisting change stream positions in the destination database.
///
/// Checkpoints live in the `replication_checkpoints` table, created on connect, one row per lease
/// key and partition.
#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Connects to the database and makes sure the checkpoint table exists.
    pub async fn connect(connection_string: &str, tls: &TlsConfig) -> EtlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options(connection_string, tls)?)
            .await?;

        sqlx::query(CREATE_CHECKPOINTS_TABLE).execute(&pool).await?;

        info!("checkpoint store ready");

        Ok(Self { pool })
    }
}

impl CheckpointStore for PostgresCheckpointStore {
    async fn get_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
    ) -> EtlResult<Option<String>> {
        let sequence_number = sqlx::query_scalar::<_, String>(SELECT_CHECKPOINT)
            .bind(lease_key)
            .bind(partition_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sequence_number)
    }

    async fn store_checkpoint(
        &self,
        lease_key: &str,
        partition_id: &str,
        sequence_number: &str,
    ) -> EtlResult<()> {
        sqlx::query(UPSERT_CHECKPOINT)
            .bind(lease_key)
            .bind(partition_id)
            .bind(sequence_number)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use etl::error::ErrorKind;

    use super::*;

    #[test]
    fn invalid_connection_string_is_a_config_error() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        };

        let err = connect_options("not a url", &tls).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn connection_string_is_parsed() {
        let tls = TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        };

        let options = connect_options("postgres://app@db.internal:6432/replica", &tls).unwrap();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_database(), Some("replica"));
    }
}
