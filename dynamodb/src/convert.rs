//! Conversions between SDK shapes and the core source types.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types as tables;
use aws_sdk_dynamodbstreams::types as streams;
use etl::bail;
use etl::error::{ErrorKind, EtlResult};
use etl::source::{
    AttributeDefinition, ChangeKind, ChangeRecord, KeySchemaElement, KeyType,
    PartitionDescription, ScalarAttributeType, SecondaryIndex, StreamHandle, TableDescription,
};
use etl::types::{AttributeValue, Item};

/// Both APIs model attribute values with the same closed shape, in two distinct types.
macro_rules! attribute_value_from_sdk {
    ($value_fn:ident, $item_fn:ident, $module:ident) => {
        pub(crate) fn $item_fn(item: &HashMap<String, $module::AttributeValue>) -> EtlResult<Item> {
            item.iter()
                .map(|(name, value)| Ok((name.clone(), $value_fn(value)?)))
                .collect()
        }

        fn $value_fn(value: &$module::AttributeValue) -> EtlResult<AttributeValue> {
            use $module::AttributeValue as Sdk;

            Ok(match value {
                Sdk::B(blob) => AttributeValue::B(blob.as_ref().to_vec()),
                Sdk::Bool(value) => AttributeValue::Bool(*value),
                Sdk::Bs(blobs) => {
                    AttributeValue::Bs(blobs.iter().map(|blob| blob.as_ref().to_vec()).collect())
                }
                Sdk::L(values) => {
                    AttributeValue::L(values.iter().map($value_fn).collect::<EtlResult<_>>()?)
                }
                Sdk::M(map) => AttributeValue::M($item_fn(map)?),
                Sdk::N(number) => AttributeValue::N(number.clone()),
                Sdk::Ns(numbers) => AttributeValue::Ns(numbers.clone()),
                Sdk::Null(null) => AttributeValue::Null(*null),
                Sdk::S(string) => AttributeValue::S(string.clone()),
                Sdk::Ss(strings) => AttributeValue::Ss(strings.clone()),
                other => bail!(
                    ErrorKind::InvalidData,
                    "Unsupported attribute value",
                    format!("{other:?}")
                ),
            })
        }
    };
}

attribute_value_from_sdk!(table_value, table_item, tables);
attribute_value_from_sdk!(stream_value, stream_item, streams);

/// Converts a scan cursor back into the key the table API expects.
pub(crate) fn item_to_sdk(item: &Item) -> HashMap<String, tables::AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), value_to_sdk(value)))
        .collect()
}

fn value_to_sdk(value: &AttributeValue) -> tables::AttributeValue {
    use tables::AttributeValue as Sdk;

    match value {
        AttributeValue::B(bytes) => Sdk::B(Blob::new(bytes.clone())),
        AttributeValue::Bool(value) => Sdk::Bool(*value),
        AttributeValue::Bs(values) => {
            Sdk::Bs(values.iter().map(|bytes| Blob::new(bytes.clone())).collect())
        }
        AttributeValue::L(values) => Sdk::L(values.iter().map(value_to_sdk).collect()),
        AttributeValue::M(map) => Sdk::M(item_to_sdk(map)),
        AttributeValue::N(number) => Sdk::N(number.clone()),
        AttributeValue::Ns(numbers) => Sdk::Ns(numbers.clone()),
        AttributeValue::Null(null) => Sdk::Null(*null),
        AttributeValue::S(string) => Sdk::S(string.clone()),
        AttributeValue::Ss(strings) => Sdk::Ss(strings.clone()),
    }
}

fn scalar_attribute_type(
    attribute_type: &tables::ScalarAttributeType,
) -> EtlResult<ScalarAttributeType> {
    match attribute_type {
        tables::ScalarAttributeType::S => Ok(ScalarAttributeType::S),
        tables::ScalarAttributeType::N => Ok(ScalarAttributeType::N),
        tables::ScalarAttributeType::B => Ok(ScalarAttributeType::B),
        other => bail!(
            ErrorKind::InvalidData,
            "Unknown attribute type in table description",
            other.as_str().to_owned()
        ),
    }
}

fn key_schema(elements: &[tables::KeySchemaElement]) -> EtlResult<Vec<KeySchemaElement>> {
    elements
        .iter()
        .map(|element| {
            let key_type = match element.key_type() {
                tables::KeyType::Hash => KeyType::Hash,
                tables::KeyType::Range => KeyType::Range,
                other => bail!(
                    ErrorKind::InvalidData,
                    "Unknown key type in table description",
                    other.as_str().to_owned()
                ),
            };

            Ok(KeySchemaElement {
                attribute_name: element.attribute_name().to_owned(),
                key_type,
            })
        })
        .collect()
}

pub(crate) fn table_description(
    table_name: &str,
    table: &tables::TableDescription,
) -> EtlResult<TableDescription> {
    let attribute_definitions = table
        .attribute_definitions()
        .iter()
        .map(|definition| {
            Ok(AttributeDefinition {
                name: definition.attribute_name().to_owned(),
                attribute_type: scalar_attribute_type(definition.attribute_type())?,
            })
        })
        .collect::<EtlResult<Vec<_>>>()?;

    let secondary_indexes = table
        .global_secondary_indexes()
        .iter()
        .map(|index| {
            Ok(SecondaryIndex {
                name: index.index_name().unwrap_or_default().to_owned(),
                key_schema: key_schema(index.key_schema())?,
            })
        })
        .collect::<EtlResult<Vec<_>>>()?;

    let stream_enabled = table
        .stream_specification()
        .is_some_and(|specification| specification.stream_enabled());

    Ok(TableDescription {
        table_name: table.table_name().unwrap_or(table_name).to_owned(),
        attribute_definitions,
        key_schema: key_schema(table.key_schema())?,
        secondary_indexes,
        stream: table
            .latest_stream_arn()
            .filter(|_| stream_enabled)
            .map(|arn| StreamHandle(arn.to_owned())),
    })
}

pub(crate) fn partition(shard: &streams::Shard) -> EtlResult<PartitionDescription> {
    let Some(partition_id) = shard.shard_id() else {
        bail!(ErrorKind::InvalidData, "Stream shard has no id");
    };

    Ok(PartitionDescription {
        partition_id: partition_id.to_owned(),
        parent_partition_id: shard.parent_shard_id().map(str::to_owned),
        closed: shard
            .sequence_number_range()
            .is_some_and(|range| range.ending_sequence_number().is_some()),
    })
}

pub(crate) fn change_record(record: &streams::Record) -> EtlResult<ChangeRecord> {
    let kind = match record.event_name() {
        Some(streams::OperationType::Insert) => ChangeKind::Insert,
        Some(streams::OperationType::Modify) => ChangeKind::Modify,
        Some(streams::OperationType::Remove) => ChangeKind::Remove,
        other => bail!(
            ErrorKind::InvalidData,
            "Unknown change stream event",
            format!("{other:?}")
        ),
    };

    let Some(data) = record.dynamodb() else {
        bail!(ErrorKind::InvalidData, "Change record has no payload");
    };
    let Some(sequence_number) = data.sequence_number() else {
        bail!(ErrorKind::InvalidData, "Change record has no sequence number");
    };

    Ok(ChangeRecord {
        kind,
        keys: data.keys().map(stream_item).transpose()?.unwrap_or_default(),
        new_image: data.new_image().map(stream_item).transpose()?,
        sequence_number: sequence_number.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str, key_type: tables::KeyType) -> tables::KeySchemaElement {
        tables::KeySchemaElement::builder()
            .attribute_name(name)
            .key_type(key_type)
            .build()
            .unwrap()
    }

    fn definition(name: &str, attribute_type: tables::ScalarAttributeType) -> tables::AttributeDefinition {
        tables::AttributeDefinition::builder()
            .attribute_name(name)
            .attribute_type(attribute_type)
            .build()
            .unwrap()
    }

    fn stream_specification(enabled: bool) -> tables::StreamSpecification {
        tables::StreamSpecification::builder()
            .stream_enabled(enabled)
            .build()
            .unwrap()
    }

    #[test]
    fn describes_a_table() {
        let table = tables::TableDescription::builder()
            .table_name("orders")
            .attribute_definitions(definition("customer", tables::ScalarAttributeType::S))
            .attribute_definitions(definition("created", tables::ScalarAttributeType::N))
            .attribute_definitions(definition("status", tables::ScalarAttributeType::S))
            .key_schema(key("customer", tables::KeyType::Hash))
            .key_schema(key("created", tables::KeyType::Range))
            .global_secondary_indexes(
                tables::GlobalSecondaryIndexDescription::builder()
                    .index_name("by-status")
                    .key_schema(key("status", tables::KeyType::Hash))
                    .build(),
            )
            .stream_specification(stream_specification(true))
            .latest_stream_arn("arn:aws:dynamodb:us-east-1:123:table/orders/stream/1")
            .build();

        let description = table_description("orders", &table).unwrap();

        assert_eq!(description.table_name, "orders");
        assert_eq!(
            description.key_schema,
            vec![
                KeySchemaElement {
                    attribute_name: "customer".to_owned(),
                    key_type: KeyType::Hash
                },
                KeySchemaElement {
                    attribute_name: "created".to_owned(),
                    key_type: KeyType::Range
                },
            ]
        );
        assert_eq!(
            description.attribute_definitions[1],
            AttributeDefinition {
                name: "created".to_owned(),
                attribute_type: ScalarAttributeType::N
            }
        );
        assert_eq!(description.secondary_indexes[0].name, "by-status");
        assert_eq!(
            description.stream,
            Some(StreamHandle(
                "arn:aws:dynamodb:us-east-1:123:table/orders/stream/1".to_owned()
            ))
        );
    }

    #[test]
    fn disabled_stream_is_absent() {
        let table = tables::TableDescription::builder()
            .table_name("orders")
            .stream_specification(stream_specification(false))
            .latest_stream_arn("arn:aws:dynamodb:us-east-1:123:table/orders/stream/1")
            .build();

        assert_eq!(table_description("orders", &table).unwrap().stream, None);
    }

    #[test]
    fn closed_shards_have_an_ending_sequence_number() {
        let closed = streams::Shard::builder()
            .shard_id("shard-0")
            .sequence_number_range(
                streams::SequenceNumberRange::builder()
                    .starting_sequence_number("1")
                    .ending_sequence_number("9")
                    .build(),
            )
            .build();
        let open = streams::Shard::builder()
            .shard_id("shard-1")
            .parent_shard_id("shard-0")
            .sequence_number_range(
                streams::SequenceNumberRange::builder()
                    .starting_sequence_number("10")
                    .build(),
            )
            .build();

        assert_eq!(
            partition(&closed).unwrap(),
            PartitionDescription {
                partition_id: "shard-0".to_owned(),
                parent_partition_id: None,
                closed: true
            }
        );
        assert_eq!(
            partition(&open).unwrap(),
            PartitionDescription {
                partition_id: "shard-1".to_owned(),
                parent_partition_id: Some("shard-0".to_owned()),
                closed: false
            }
        );
    }

    #[test]
    fn reads_stream_records() {
        let modify = streams::Record::builder()
            .event_name(streams::OperationType::Modify)
            .dynamodb(
                streams::StreamRecord::builder()
                    .keys("id", streams::AttributeValue::N("1".to_owned()))
                    .new_image("id", streams::AttributeValue::N("1".to_owned()))
                    .new_image("name", streams::AttributeValue::S("a".to_owned()))
                    .sequence_number("100")
                    .build(),
            )
            .build();
        let remove = streams::Record::builder()
            .event_name(streams::OperationType::Remove)
            .dynamodb(
                streams::StreamRecord::builder()
                    .keys("id", streams::AttributeValue::N("2".to_owned()))
                    .sequence_number("101")
                    .build(),
            )
            .build();

        let modify = change_record(&modify).unwrap();
        let remove = change_record(&remove).unwrap();

        assert_eq!(modify.kind, ChangeKind::Modify);
        assert_eq!(
            modify.new_image.as_ref().and_then(|image| image.get("name")),
            Some(&AttributeValue::S("a".to_owned()))
        );
        assert_eq!(remove.kind, ChangeKind::Remove);
        assert_eq!(remove.new_image, None);
        assert_eq!(remove.sequence_number, "101");
        assert_eq!(
            remove.keys.get("id"),
            Some(&AttributeValue::N("2".to_owned()))
        );
    }

    #[test]
    fn record_without_payload_is_invalid_data() {
        let record = streams::Record::builder()
            .event_name(streams::OperationType::Insert)
            .build();

        assert_eq!(
            change_record(&record).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }

    #[test]
    fn nested_values_survive_a_scan_cursor() {
        let item = Item::from([
            ("id".to_owned(), AttributeValue::N("7".to_owned())),
            (
                "payload".to_owned(),
                AttributeValue::M(Item::from([(
                    "tags".to_owned(),
                    AttributeValue::L(vec![
                        AttributeValue::B(vec![0, 1]),
                        AttributeValue::Ss(vec!["a".to_owned()]),
                        AttributeValue::Null(true),
                    ]),
                )])),
            ),
        ]);

        assert_eq!(table_item(&item_to_sdk(&item)).unwrap(), item);
    }
}
