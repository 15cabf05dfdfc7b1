use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// A source item: attribute name to attribute value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A value of the schemaless source store.
///
/// Serializes to the tagged wire representation used by the source API, for example
/// `{"S": "abc"}` or `{"L": [{"N": "1"}]}`. Binary payloads travel base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "B", with = "base64_bytes")]
    B(Vec<u8>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "BS", with = "base64_bytes_list")]
    Bs(Vec<Vec<u8>>),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    /// A number in its exact decimal text form.
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
}

impl AttributeValue {
    /// Converts the value to plain JSON.
    ///
    /// Numbers become JSON numbers when they fit one and strings otherwise, binary values
    /// become base64 strings and sets become arrays.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            AttributeValue::B(bytes) => Value::String(STANDARD.encode(bytes)),
            AttributeValue::Bool(value) => Value::Bool(*value),
            AttributeValue::Bs(values) => Value::Array(
                values
                    .iter()
                    .map(|bytes| Value::String(STANDARD.encode(bytes)))
                    .collect(),
            ),
            AttributeValue::L(values) => {
                Value::Array(values.iter().map(AttributeValue::to_json).collect())
            }
            AttributeValue::M(values) => Value::Object(
                values
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            AttributeValue::N(number) => number_to_json(number),
            AttributeValue::Ns(numbers) => {
                Value::Array(numbers.iter().map(|n| number_to_json(n)).collect())
            }
            AttributeValue::Null(_) => Value::Null,
            AttributeValue::S(value) => Value::String(value.clone()),
            AttributeValue::Ss(values) => {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

/// Converts a whole item to a JSON object.
pub fn item_to_json(item: &Item) -> serde_json::Value {
    serde_json::Value::Object(
        item.iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// Numbers keep their exact digits, up to the 38 significant digits the source allows.
fn number_to_json(number: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Number>(number) {
        Ok(parsed) => serde_json::Value::Number(parsed),
        Err(_) => serde_json::Value::String(number.to_owned()),
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_list {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for bytes in values {
            seq.serialize_element(&STANDARD.encode(bytes))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .collect()
    }
}
