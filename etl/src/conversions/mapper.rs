use std::sync::Arc;

use config::shared::{ColumnNaming, ConversionMode};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::schema::{TableColumn, TableColumnType, TableName, TableSchema};
use crate::source::{KeyType, ScalarAttributeType, TableDescription};
use crate::types::{
    AttributeValue, Item, PrimaryKeyValue, TableColumnValue, TableRow, item_to_json,
};

/// Name of the column holding the whole item in [`ConversionMode::Jsonb`].
pub const DATA_COLUMN_NAME: &str = "data";

/// Returns the column type for a source value, or `None` for explicit nulls.
pub fn classify(value: &AttributeValue) -> Option<TableColumnType> {
    match value {
        AttributeValue::B(_) => Some(TableColumnType::Bytea),
        AttributeValue::Bool(_) => Some(TableColumnType::Boolean),
        AttributeValue::Bs(_)
        | AttributeValue::L(_)
        | AttributeValue::M(_)
        | AttributeValue::Ns(_)
        | AttributeValue::Ss(_) => Some(TableColumnType::Jsonb),
        AttributeValue::N(_) => Some(TableColumnType::Numeric),
        AttributeValue::S(_) => Some(TableColumnType::Text),
        AttributeValue::Null(_) => None,
    }
}

/// Converts a source value to the column value matching [`classify`].
pub fn to_column_value(value: &AttributeValue) -> Option<TableColumnValue> {
    let column_value = match value {
        AttributeValue::B(bytes) => TableColumnValue::Bytes(bytes.clone()),
        AttributeValue::Bool(value) => TableColumnValue::Bool(*value),
        AttributeValue::N(number) => TableColumnValue::Numeric(number.clone()),
        AttributeValue::S(text) => TableColumnValue::Text(text.clone()),
        AttributeValue::Bs(_)
        | AttributeValue::L(_)
        | AttributeValue::M(_)
        | AttributeValue::Ns(_)
        | AttributeValue::Ss(_) => TableColumnValue::Json(value.to_json().to_string()),
        AttributeValue::Null(_) => return None,
    };

    Some(column_value)
}

/// Outcome of looking up the column for a `(name, type)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnResolution {
    /// A column with a matching type exists under this name.
    Existing(String),
    /// No column exists yet under this name.
    Missing(String),
}

/// Returns the column that stores values of `column_type` for the attribute `name`.
///
/// A column of a different type is never reused: the lookup moves on to `<name>_<type>` and
/// repeats until it finds a matching column or a free name.
pub fn resolve_column(
    schema: &TableSchema,
    name: &str,
    column_type: TableColumnType,
) -> ColumnResolution {
    let mut candidate = name.to_owned();
    loop {
        match schema.column(&candidate) {
            None => return ColumnResolution::Missing(candidate),
            Some(column) if column.column_type() == column_type => {
                return ColumnResolution::Existing(candidate);
            }
            Some(_) => candidate = format!("{candidate}_{column_type}"),
        }
    }
}

/// Maps source items to rows and evolves table schemas as new value shapes appear.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeMapper {
    column_naming: ColumnNaming,
    conversion_mode: ConversionMode,
}

impl TypeMapper {
    pub fn new(column_naming: ColumnNaming, conversion_mode: ConversionMode) -> Self {
        Self {
            column_naming,
            conversion_mode,
        }
    }

    pub fn conversion_mode(&self) -> ConversionMode {
        self.conversion_mode
    }

    /// Returns the column name used for a source attribute.
    pub fn column_name(&self, attribute_name: &str) -> String {
        match self.column_naming {
            ColumnNaming::Preserve => attribute_name.to_owned(),
            ColumnNaming::LowerCase => attribute_name.to_lowercase(),
        }
    }

    /// Adds the columns needed to store `item` and returns them.
    ///
    /// Does nothing in [`ConversionMode::Jsonb`], where the schema is fixed at creation.
    pub fn evolve(&self, schema: &mut TableSchema, item: &Item) -> EtlResult<Vec<TableColumn>> {
        if self.conversion_mode == ConversionMode::Jsonb {
            return Ok(Vec::new());
        }

        let mut new_columns = Vec::new();
        for (attribute_name, value) in item {
            let Some(column_type) = classify(value) else {
                continue;
            };

            let name = self.column_name(attribute_name);
            if let ColumnResolution::Missing(name) = resolve_column(schema, &name, column_type) {
                let column = schema.add_column(name, column_type)?.clone();
                new_columns.push(column);
            }
        }

        Ok(new_columns)
    }

    /// Builds the row for `item` against `schema`.
    ///
    /// Values whose column is not part of `schema` are dropped.
    pub fn row_from_item(&self, schema: &Arc<TableSchema>, item: &Item) -> EtlResult<TableRow> {
        let mut row = TableRow::new(schema.clone());

        for (attribute_name, value) in item {
            let (Some(column_type), Some(column_value)) = (classify(value), to_column_value(value))
            else {
                continue;
            };

            let name = self.column_name(attribute_name);
            match resolve_column(schema, &name, column_type) {
                ColumnResolution::Existing(column_name) => {
                    if self.conversion_mode == ConversionMode::Jsonb
                        && column_name == DATA_COLUMN_NAME
                    {
                        continue;
                    }

                    row.set_value(column_name, column_value)?;
                }
                ColumnResolution::Missing(column_name) => {
                    if self.conversion_mode == ConversionMode::Columns {
                        debug!(
                            table_name = %schema.name(),
                            column_name,
                            "dropping value of a column not yet visible in the schema"
                        );
                    }
                }
            }
        }

        if self.conversion_mode == ConversionMode::Jsonb {
            row.set_value(
                DATA_COLUMN_NAME,
                TableColumnValue::Json(item_to_json(item).to_string()),
            )?;
        }

        Ok(row)
    }

    /// Builds the primary key addressed by the key attributes `keys`.
    ///
    /// Attributes that do not map to a primary key column are ignored. Fails with
    /// [`ErrorKind::InvalidData`] if a primary key column is left without a value.
    pub fn key_from_item(
        &self,
        schema: &Arc<TableSchema>,
        keys: &Item,
    ) -> EtlResult<PrimaryKeyValue> {
        let mut key = PrimaryKeyValue::new(schema.clone());

        for (attribute_name, value) in keys {
            let (Some(column_type), Some(column_value)) = (classify(value), to_column_value(value))
            else {
                continue;
            };

            let name = self.column_name(attribute_name);
            if let ColumnResolution::Existing(column_name) =
                resolve_column(schema, &name, column_type)
                && schema.is_primary_key(&column_name)
            {
                key.set_value(column_name, column_value)?;
            }
        }

        if !key.is_complete() {
            bail!(
                ErrorKind::InvalidData,
                "Key attributes do not cover the primary key",
                format!(
                    "table `{}` has primary key ({}) but the change record carries {:?}",
                    schema.name(),
                    schema.primary_key().join(", "),
                    keys.keys().collect::<Vec<_>>()
                )
            );
        }

        Ok(key)
    }

    /// Derives the initial schema of a table from its source description.
    ///
    /// Every declared attribute becomes a column typed after its scalar type. Key attributes are
    /// `NOT NULL` and form the primary key in key order. The partition key becomes the
    /// distribution column when `distributed` is set, and each secondary index becomes an index
    /// over its key columns.
    pub fn base_schema(
        &self,
        table_name: TableName,
        description: &TableDescription,
        distributed: bool,
    ) -> EtlResult<TableSchema> {
        let mut schema = TableSchema::new(table_name);

        for definition in &description.attribute_definitions {
            let column_type = match definition.attribute_type {
                ScalarAttributeType::S => TableColumnType::Text,
                ScalarAttributeType::N => TableColumnType::Numeric,
                ScalarAttributeType::B => TableColumnType::Bytea,
            };
            schema.add_column(self.column_name(&definition.name), column_type)?;
        }

        let mut primary_key = Vec::with_capacity(description.key_schema.len());
        for element in &description.key_schema {
            let name = self.column_name(&element.attribute_name);
            if !schema.has_column(&name) {
                bail!(
                    ErrorKind::InvalidData,
                    "Key attribute has no declared type",
                    format!(
                        "key attribute `{}` of table `{}` is missing from the attribute definitions",
                        element.attribute_name, description.table_name
                    )
                );
            }

            schema.set_not_null(&name)?;
            if element.key_type == KeyType::Hash && distributed {
                schema.set_distribution_column(&name)?;
            }
            primary_key.push(name);
        }
        schema.set_primary_key(primary_key)?;

        for index in &description.secondary_indexes {
            let columns = index
                .key_schema
                .iter()
                .map(|element| self.column_name(&element.attribute_name))
                .collect();
            schema.add_index(index.name.clone(), columns);
        }

        if self.conversion_mode == ConversionMode::Jsonb
            && let ColumnResolution::Missing(name) =
                resolve_column(&schema, DATA_COLUMN_NAME, TableColumnType::Jsonb)
        {
            schema.add_column(name, TableColumnType::Jsonb)?;
        }

        Ok(schema)
    }
}
