//! Table and value schemas
//!
//! A schema names every cell of every table (or every value) with its type
//! and an optional default. A default whose type differs from the declared
//! one is dropped when the schema is applied.

use crate::value::{Id, Value, ValueType};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Schema for one cell or value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSchema {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

pub type ValueSchema = CellSchema;
pub type TableSchema = IndexMap<Id, CellSchema>;
pub type TablesSchema = IndexMap<Id, TableSchema>;
pub type ValuesSchema = IndexMap<Id, ValueSchema>;

impl CellSchema {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            default: None,
        }
    }

    pub fn with_default(value_type: ValueType, default: impl Into<Value>) -> Self {
        Self {
            value_type,
            default: Some(default.into()),
        }
    }

    fn normalized(mut self) -> Self {
        if self
            .default
            .as_ref()
            .is_some_and(|default| default.value_type() != Some(self.value_type))
        {
            debug!(value_type = ?self.value_type, "dropping default of mismatched type");
            self.default = None;
        }
        self
    }

    fn from_json(json: &serde_json::Value) -> Option<Self> {
        let object = json.as_object()?;
        let value_type = ValueType::from_name(object.get("type")?.as_str()?)?;
        let default = object.get("default").and_then(Value::from_json);
        Some(Self { value_type, default }.normalized())
    }
}

/// Drop mismatched defaults and empty tables. `None` if nothing is left.
pub(crate) fn normalize_tables_schema(schema: TablesSchema) -> Option<TablesSchema> {
    let schema: TablesSchema = schema
        .into_iter()
        .filter_map(|(table_id, table)| {
            let table: TableSchema = table
                .into_iter()
                .map(|(cell_id, cell)| (cell_id, cell.normalized()))
                .collect();
            (!table.is_empty()).then_some((table_id, table))
        })
        .collect();
    (!schema.is_empty()).then_some(schema)
}

/// Drop mismatched defaults. `None` if the schema is empty.
pub(crate) fn normalize_values_schema(schema: ValuesSchema) -> Option<ValuesSchema> {
    let schema: ValuesSchema = schema
        .into_iter()
        .map(|(value_id, value)| (value_id, value.normalized()))
        .collect();
    (!schema.is_empty()).then_some(schema)
}

/// Lenient parse of a tables schema: entries that are not well-formed are
/// skipped rather than failing the whole schema
pub(crate) fn tables_schema_from_json(json: &serde_json::Value) -> Option<TablesSchema> {
    let schema = json
        .as_object()?
        .iter()
        .filter_map(|(table_id, table)| {
            let table: TableSchema = table
                .as_object()?
                .iter()
                .filter_map(|(cell_id, cell)| Some((cell_id.clone(), CellSchema::from_json(cell)?)))
                .collect();
            Some((table_id.clone(), table))
        })
        .collect();
    normalize_tables_schema(schema)
}

/// Lenient parse of a values schema
pub(crate) fn values_schema_from_json(json: &serde_json::Value) -> Option<ValuesSchema> {
    let schema = json
        .as_object()?
        .iter()
        .filter_map(|(value_id, value)| Some((value_id.clone(), CellSchema::from_json(value)?)))
        .collect();
    normalize_values_schema(schema)
}

/// Defaults derived from a table (or values) schema
#[derive(Debug, Clone, Default)]
pub(crate) struct Defaults {
    /// Cells with a default, and that default
    pub(crate) defaulted: IndexMap<Id, Value>,
    /// Cells without a default
    pub(crate) required: IndexSet<Id>,
}

impl Defaults {
    pub(crate) fn from_schema(schema: &IndexMap<Id, CellSchema>) -> Self {
        let mut defaults = Self::default();
        for (id, cell) in schema {
            match &cell.default {
                Some(default) => {
                    defaults.defaulted.insert(id.clone(), default.clone());
                }
                None => {
                    defaults.required.insert(id.clone());
                }
            }
        }
        defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mismatched_default_is_dropped() {
        let schema = normalize_tables_schema(IndexMap::from([(
            "pets".to_string(),
            IndexMap::from([
                ("legs".to_string(), CellSchema::with_default(ValueType::Number, "four")),
                ("sold".to_string(), CellSchema::with_default(ValueType::Boolean, false)),
            ]),
        )]))
        .unwrap();
        assert_eq!(schema["pets"]["legs"].default, None);
        assert_eq!(schema["pets"]["sold"].default, Some(Value::from(false)));
    }

    #[test]
    fn test_empty_schema_is_none() {
        assert!(normalize_tables_schema(IndexMap::new()).is_none());
        assert!(normalize_values_schema(IndexMap::new()).is_none());
        let only_empty_table = IndexMap::from([("t".to_string(), IndexMap::new())]);
        assert!(normalize_tables_schema(only_empty_table).is_none());
    }

    #[test]
    fn test_lenient_json_parse() {
        let schema = tables_schema_from_json(&json!({
            "pets": {
                "species": {"type": "string"},
                "legs": {"type": "number", "default": 4},
                "bogus": {"type": "date"},
                "broken": 3
            },
            "notATable": "x"
        }))
        .unwrap();
        assert_eq!(schema.len(), 1);
        assert_eq!(schema["pets"].len(), 2);
        assert_eq!(schema["pets"]["legs"].default, Some(Value::from(4)));

        let values = values_schema_from_json(&json!({"open": {"type": "boolean", "default": 1}}))
            .unwrap();
        assert_eq!(values["open"], CellSchema::new(ValueType::Boolean));
        assert!(values_schema_from_json(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_schema_serde_shape() {
        let cell = CellSchema::with_default(ValueType::Number, 4);
        assert_eq!(
            serde_json::to_value(&cell).unwrap(),
            json!({"type": "number", "default": 4})
        );
        let parsed: CellSchema = serde_json::from_value(json!({"type": "string"})).unwrap();
        assert_eq!(parsed, CellSchema::new(ValueType::String));
    }

    #[test]
    fn test_defaults_split() {
        let schema = IndexMap::from([
            ("a".to_string(), CellSchema::with_default(ValueType::Number, 1)),
            ("b".to_string(), CellSchema::new(ValueType::String)),
        ]);
        let defaults = Defaults::from_schema(&schema);
        assert_eq!(defaults.defaulted.len(), 1);
        assert!(defaults.required.contains("b"));
    }
}
