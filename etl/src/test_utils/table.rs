use crate::source::{
    AttributeDefinition, KeySchemaElement, KeyType, ScalarAttributeType, StreamHandle,
    TableDescription,
};

/// Describes a table keyed by a single numeric partition key, with an optional change stream.
pub fn keyed_table_description(
    table_name: &str,
    key_attribute: &str,
    stream: Option<&str>,
) -> TableDescription {
    TableDescription {
        table_name: table_name.to_owned(),
        attribute_definitions: vec![AttributeDefinition {
            name: key_attribute.to_owned(),
            attribute_type: ScalarAttributeType::N,
        }],
        key_schema: vec![KeySchemaElement {
            attribute_name: key_attribute.to_owned(),
            key_type: KeyType::Hash,
        }],
        secondary_indexes: Vec::new(),
        stream: stream.map(|stream| StreamHandle(stream.to_owned())),
    }
}
