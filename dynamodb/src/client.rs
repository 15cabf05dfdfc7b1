use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_dynamodb::types::ReturnConsumedCapacity;
use aws_sdk_dynamodbstreams::types::ShardIteratorType;
use config::shared::SourceConfig;
use etl::bail;
use etl::error::{ErrorKind, EtlResult};
use etl::source::{
    ChangePage, CursorPosition, PartitionCursor, PartitionDescription, ScanCursor, ScanPage,
    SourceReader, StreamHandle, TableDescription,
};
use tracing::{debug, info};

use crate::convert::{change_record, item_to_sdk, partition, table_description, table_item};
use crate::error::sdk_error;

const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads the shared SDK configuration for `config`.
///
/// Credentials come from the standard AWS provider chain. The SDK's own retries are disabled so
/// that transient faults are retried once, by the pipeline's retry policy. A custom endpoint
/// serves both the table and the stream API.
async fn load_sdk_config(config: &SourceConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .retry_config(RetryConfig::disabled())
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(OPERATION_TIMEOUT)
                .build(),
        );

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }

    loader.load().await
}

/// DynamoDB and DynamoDB Streams source.
///
/// Clones share the underlying SDK clients and their connection pool.
#[derive(Debug, Clone)]
pub struct DynamoDbSource {
    tables: aws_sdk_dynamodb::Client,
    streams: aws_sdk_dynamodbstreams::Client,
}

impl DynamoDbSource {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            tables: aws_sdk_dynamodb::Client::new(sdk_config),
            streams: aws_sdk_dynamodbstreams::Client::new(sdk_config),
        }
    }

    /// Builds a source for the configured region and endpoint.
    pub async fn connect(config: &SourceConfig) -> Self {
        let sdk_config = load_sdk_config(config).await;

        info!(
            region = %config.region,
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            "source client ready"
        );

        Self::new(&sdk_config)
    }
}

impl SourceReader for DynamoDbSource {
    async fn list_tables(&self) -> EtlResult<Vec<String>> {
        let mut table_names = Vec::new();
        let mut exclusive_start_table_name = None;

        loop {
            let output = self
                .tables
                .list_tables()
                .set_exclusive_start_table_name(exclusive_start_table_name)
                .send()
                .await
                .map_err(|err| sdk_error("ListTables", err))?;

            table_names.extend_from_slice(output.table_names());

            match output.last_evaluated_table_name() {
                Some(last) => exclusive_start_table_name = Some(last.to_owned()),
                None => return Ok(table_names),
            }
        }
    }

    async fn describe_table(&self, table_name: &str) -> EtlResult<TableDescription> {
        let output = self
            .tables
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(|err| sdk_error("DescribeTable", err))?;

        let Some(table) = output.table() else {
            bail!(
                ErrorKind::SourceTableMissing,
                "Source table has no description",
                table_name
            );
        };

        table_description(table_name, table)
    }

    async fn scan_page(
        &self,
        table_name: &str,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> EtlResult<ScanPage> {
        let output = self
            .tables
            .scan()
            .table_name(table_name)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .consistent_read(true)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .set_exclusive_start_key(cursor.map(|cursor| item_to_sdk(&cursor.0)))
            .send()
            .await
            .map_err(|err| sdk_error("Scan", err))?;

        let items = output
            .items()
            .iter()
            .map(table_item)
            .collect::<EtlResult<Vec<_>>>()?;
        let consumed_capacity = output
            .consumed_capacity()
            .and_then(|capacity| capacity.capacity_units())
            .unwrap_or_default();

        debug!(table_name, items = items.len(), consumed_capacity, "scanned page");

        Ok(ScanPage {
            items,
            next_cursor: output
                .last_evaluated_key()
                .map(table_item)
                .transpose()?
                .map(ScanCursor),
            consumed_capacity,
        })
    }

    async fn describe_stream(&self, stream: &StreamHandle) -> EtlResult<Vec<PartitionDescription>> {
        let mut partitions = Vec::new();
        let mut exclusive_start_shard_id = None;

        loop {
            let output = self
                .streams
                .describe_stream()
                .stream_arn(&stream.0)
                .set_exclusive_start_shard_id(exclusive_start_shard_id)
                .send()
                .await
                .map_err(|err| sdk_error("DescribeStream", err))?;

            let Some(description) = output.stream_description() else {
                return Ok(partitions);
            };

            for shard in description.shards() {
                partitions.push(partition(shard)?);
            }

            match description.last_evaluated_shard_id() {
                Some(last) => exclusive_start_shard_id = Some(last.to_owned()),
                None => return Ok(partitions),
            }
        }
    }

    async fn open_partition_cursor(
        &self,
        stream: &StreamHandle,
        partition_id: &str,
        position: CursorPosition,
    ) -> EtlResult<PartitionCursor> {
        let (shard_iterator_type, sequence_number) = match position {
            CursorPosition::TrimHorizon => (ShardIteratorType::TrimHorizon, None),
            CursorPosition::AfterSequenceNumber(sequence_number) => {
                (ShardIteratorType::AfterSequenceNumber, Some(sequence_number))
            }
        };

        let output = self
            .streams
            .get_shard_iterator()
            .stream_arn(&stream.0)
            .shard_id(partition_id)
            .shard_iterator_type(shard_iterator_type)
            .set_sequence_number(sequence_number)
            .send()
            .await
            .map_err(|err| sdk_error("GetShardIterator", err))?;

        let Some(shard_iterator) = output.shard_iterator() else {
            bail!(
                ErrorKind::InvalidData,
                "Source returned no shard iterator",
                partition_id
            );
        };

        Ok(PartitionCursor(shard_iterator.to_owned()))
    }

    async fn read_change_page(&self, cursor: &PartitionCursor) -> EtlResult<ChangePage> {
        let output = self
            .streams
            .get_records()
            .shard_iterator(&cursor.0)
            .send()
            .await
            .map_err(|err| sdk_error("GetRecords", err))?;

        Ok(ChangePage {
            records: output
                .records()
                .iter()
                .map(change_record)
                .collect::<EtlResult<Vec<_>>>()?,
            next_cursor: output
                .next_shard_iterator()
                .map(|iterator| PartitionCursor(iterator.to_owned())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn custom_endpoint_is_applied() {
        let config = SourceConfig {
            region: "eu-west-1".to_owned(),
            endpoint: Some("http://localhost:8000".to_owned()),
            ..SourceConfig::default()
        };

        let sdk_config = load_sdk_config(&config).await;

        assert_eq!(sdk_config.region().map(|region| region.as_ref()), Some("eu-west-1"));
        assert_eq!(sdk_config.endpoint_url(), Some("http://localhost:8000"));
        assert_eq!(
            sdk_config.retry_config().map(|retry| retry.max_attempts()),
            Some(1)
        );
    }
}
