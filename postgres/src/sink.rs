use std::pin::pin;

use bytes::Bytes;
use config::shared::TlsConfig;
use etl::destination::Sink;
use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::schema::{TableColumn, TableColumnType, TableName, TableSchema};
use etl::types::{PrimaryKeyValue, RowBatch, TableRow};
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info};

use crate::tls;

const DEFAULT_SCHEMA: &str = "public";

const TABLE_COLUMNS_QUERY: &str = "
    select column_name::text, data_type::text, is_nullable = 'NO' as not_null
    from information_schema.columns
    where table_schema = $1::text and table_name = $2::text
    order by ordinal_position";

const PRIMARY_KEY_QUERY: &str = "
    select k.column_name::text
    from information_schema.table_constraints c
    join information_schema.key_column_usage k
        on k.constraint_schema = c.constraint_schema
        and k.constraint_name = c.constraint_name
    where c.constraint_type = 'PRIMARY KEY'
        and c.table_schema = $1::text
        and c.table_name = $2::text
    order by k.ordinal_position";

const CITUS_INSTALLED_QUERY: &str =
    "select exists (select 1 from pg_extension where extname = 'citus')";

const DISTRIBUTION_COLUMN_QUERY: &str = "
    select column_to_column_name(logicalrelid, partkey)
    from pg_dist_partition
    where logicalrelid = $1::text::regclass";

/// A column as reported by the destination catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
}

/// Builds the schema of an existing table from its catalog description.
///
/// Returns `None` when the catalog reports no column, i.e. the table does not exist.
pub fn schema_from_catalog(
    table_name: TableName,
    columns: Vec<CatalogColumn>,
    primary_key: Vec<String>,
    distribution_column: Option<String>,
) -> EtlResult<Option<TableSchema>> {
    if columns.is_empty() {
        return Ok(None);
    }

    let mut schema = TableSchema::new(table_name);
    for column in columns {
        schema.add_column(
            column.name.clone(),
            TableColumnType::from_name(&column.data_type),
        )?;
        if column.not_null {
            schema.set_not_null(&column.name)?;
        }
    }

    if !primary_key.is_empty() {
        schema.set_primary_key(primary_key)?;
    }
    if let Some(column) = distribution_column {
        schema.set_distribution_column(&column)?;
    }

    Ok(Some(schema))
}

/// Spawns a background task driving a connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!(error = %err, "postgres connection failed"),
            Ok(()) => debug!("postgres connection terminated"),
        }
    }
    .instrument(span);

    // The connection ends when its client is dropped, the handle is not needed.
    tokio::spawn(task);
}

/// Postgres destination, optionally distributed with Citus.
///
/// DDL runs as a batch of statements, bulk loads use `COPY ... FROM STDIN` and single-row writes
/// are simple statements. One sink owns one connection.
#[derive(Debug)]
pub struct PostgresSink {
    client: Mutex<Option<Client>>,
}

impl PostgresSink {
    /// Connects to the database at `connection_string`, with TLS when `tls` is enabled.
    pub async fn connect(connection_string: &str, tls: &TlsConfig) -> EtlResult<Self> {
        let config = connection_string.parse::<Config>()?;

        let client = if tls.enabled {
            let make_tls = MakeRustlsConnect::new(tls::client_config(tls)?);
            let (client, connection) = config.connect(make_tls).await?;
            spawn_postgres_connection::<MakeRustlsConnect>(connection);

            info!("connected to postgres with tls");

            client
        } else {
            let (client, connection) = config.connect(NoTls).await?;
            spawn_postgres_connection::<NoTls>(connection);

            info!("connected to postgres without tls");

            client
        };

        Ok(Self {
            client: Mutex::new(Some(client)),
        })
    }

    /// Runs `statements` as one simple-query batch.
    async fn execute(&self, statements: &str) -> EtlResult<()> {
        let client = self.client.lock().await;
        let client = connected(&client)?;

        debug!(statements, "executing statements");
        client.batch_execute(statements).await?;

        Ok(())
    }
}

fn connected(client: &Option<Client>) -> EtlResult<&Client> {
    client.as_ref().ok_or_else(|| {
        etl_error!(
            ErrorKind::DestinationConnectionFailed,
            "Postgres sink is closed"
        )
    })
}

impl Sink for PostgresSink {
    fn name() -> &'static str {
        "postgres"
    }

    async fn fetch_schema(&self, table_name: &TableName) -> EtlResult<Option<TableSchema>> {
        let client = self.client.lock().await;
        let client = connected(&client)?;

        let schema_name = table_name.schema.as_deref().unwrap_or(DEFAULT_SCHEMA);

        let columns = client
            .query(TABLE_COLUMNS_QUERY, &[&schema_name, &table_name.name])
            .await?
            .into_iter()
            .map(|row| {
                Ok(CatalogColumn {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    not_null: row.try_get(2)?,
                })
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()?;

        let primary_key = client
            .query(PRIMARY_KEY_QUERY, &[&schema_name, &table_name.name])
            .await?
            .into_iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;

        let citus_installed: bool = client
            .query_one(CITUS_INSTALLED_QUERY, &[])
            .await?
            .try_get(0)?;
        let distribution_column = if citus_installed && !columns.is_empty() {
            client
                .query_opt(
                    DISTRIBUTION_COLUMN_QUERY,
                    &[&table_name.as_quoted_identifier()],
                )
                .await?
                .map(|row| row.try_get::<_, Option<String>>(0))
                .transpose()?
                .flatten()
        } else {
            None
        };

        schema_from_catalog(table_name.clone(), columns, primary_key, distribution_column)
    }

    async fn create_table(&self, schema: &TableSchema) -> EtlResult<()> {
        self.execute(&schema.to_ddl_list().join(";\n")).await?;

        info!(table_name = %schema.name(), "created destination table");

        Ok(())
    }

    async fn create_column(&self, schema: &TableSchema, column: &TableColumn) -> EtlResult<()> {
        self.execute(&schema.add_column_ddl(column)).await
    }

    async fn truncate_table(&self, schema: &TableSchema) -> EtlResult<()> {
        self.execute(&schema.truncate_ddl()).await
    }

    async fn bulk_load(&self, batch: &RowBatch) -> EtlResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let client = self.client.lock().await;
        let client = connected(&client)?;

        let copy_in = client
            .copy_in::<_, Bytes>(&batch.schema().copy_from_stdin())
            .await?;
        let mut copy_in = pin!(copy_in);
        copy_in.send(Bytes::from(batch.to_copy_input())).await?;
        let rows = copy_in.as_mut().finish().await?;

        debug!(table_name = %batch.schema().name(), rows, "copied rows");

        Ok(rows)
    }

    async fn upsert(&self, row: &TableRow) -> EtlResult<()> {
        self.execute(&row.to_upsert()).await
    }

    async fn delete(&self, key: &PrimaryKeyValue) -> EtlResult<()> {
        self.execute(&key.to_delete()).await
    }

    async fn close(&self) -> EtlResult<()> {
        // Dropping the client terminates its connection task.
        self.client.lock().await.take();

        Ok(())
    }
}
