//! JSON import and export
//!
//! Exports serialize the data (or schema) directly. Imports are lenient
//! about content: anything that is not a valid cell or value is recorded
//! as invalid and skipped like any other bad write. Only text that is not
//! JSON, or whose top level has the wrong shape, is rejected.

use super::{Row, Store, Table, Tables, Values};
use crate::error::{Result, StoreError};
use crate::schema::{tables_schema_from_json, values_schema_from_json};
use crate::value::Value;
use serde_json::{json, Map};
use tracing::warn;

impl Store {
    pub fn get_tables_json(&self) -> String {
        serde_json::to_string(&self.tables).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn get_values_json(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_string())
    }

    /// `[tables, values]`
    pub fn get_json(&self) -> String {
        serde_json::to_string(&(&self.tables, &self.values)).unwrap_or_else(|_| "[{},{}]".to_string())
    }

    pub fn get_tables_schema_json(&self) -> String {
        match &self.tables_schema {
            Some(schema) => serde_json::to_string(schema).unwrap_or_else(|_| "{}".to_string()),
            None => "{}".to_string(),
        }
    }

    pub fn get_values_schema_json(&self) -> String {
        match &self.values_schema {
            Some(schema) => serde_json::to_string(schema).unwrap_or_else(|_| "{}".to_string()),
            None => "{}".to_string(),
        }
    }

    /// `[tablesSchema, valuesSchema]`
    pub fn get_schema_json(&self) -> String {
        format!("[{},{}]", self.get_tables_schema_json(), self.get_values_schema_json())
    }

    pub fn try_set_tables_json(&mut self, tables_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(tables_json)?;
        let object = expect_object(json, "tables")?;
        Ok(self.fluent(|store| {
            let tables = store.tables_from_json(object);
            store.set_tables(tables);
        }))
    }

    pub fn try_set_values_json(&mut self, values_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(values_json)?;
        let object = expect_object(json, "values")?;
        Ok(self.fluent(|store| {
            let values = store.values_from_json(object);
            store.set_values(values);
        }))
    }

    /// Import `[tables, values]`
    pub fn try_set_json(&mut self, content_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(content_json)?;
        let (tables, values) = split_pair(json, "content")?;
        let tables = expect_object(tables, "tables")?;
        let values = expect_object(values, "values")?;
        Ok(self.fluent(|store| {
            let tables = store.tables_from_json(tables);
            let values = store.values_from_json(values);
            store.set_tables(tables);
            store.set_values(values);
        }))
    }

    pub fn try_set_tables_schema_json(&mut self, schema_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(schema_json)?;
        let schema = tables_schema_from_json(&json)
            .ok_or_else(|| StoreError::InvalidSchema("no valid table schema".to_string()))?;
        Ok(self.set_tables_schema(schema))
    }

    pub fn try_set_values_schema_json(&mut self, schema_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(schema_json)?;
        let schema = values_schema_from_json(&json)
            .ok_or_else(|| StoreError::InvalidSchema("no valid value schema".to_string()))?;
        Ok(self.set_values_schema(schema))
    }

    /// Import `[tablesSchema, valuesSchema]`; either half may be `{}`
    pub fn try_set_schema_json(&mut self, schema_json: &str) -> Result<&mut Self> {
        let json: serde_json::Value = serde_json::from_str(schema_json)?;
        let (tables, values) = split_pair(json, "schema")?;
        let tables_schema = tables_schema_from_json(&tables);
        let values_schema = values_schema_from_json(&values);
        if tables_schema.is_none() && values_schema.is_none() {
            return Err(StoreError::InvalidSchema("no valid schema".to_string()));
        }
        Ok(self.fluent(|store| {
            if let Some(schema) = tables_schema {
                store.set_tables_schema(schema);
            }
            if let Some(schema) = values_schema {
                store.set_values_schema(schema);
            }
        }))
    }

    pub fn set_tables_json(&mut self, tables_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_tables_json(tables_json) {
            warn!(%error, "ignoring tables JSON");
        }
        self
    }

    pub fn set_values_json(&mut self, values_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_values_json(values_json) {
            warn!(%error, "ignoring values JSON");
        }
        self
    }

    pub fn set_json(&mut self, content_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_json(content_json) {
            warn!(%error, "ignoring content JSON");
        }
        self
    }

    pub fn set_tables_schema_json(&mut self, schema_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_tables_schema_json(schema_json) {
            warn!(%error, "ignoring tables schema JSON");
        }
        self
    }

    pub fn set_values_schema_json(&mut self, schema_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_values_schema_json(schema_json) {
            warn!(%error, "ignoring values schema JSON");
        }
        self
    }

    pub fn set_schema_json(&mut self, schema_json: &str) -> &mut Self {
        if let Err(error) = self.try_set_schema_json(schema_json) {
            warn!(%error, "ignoring schema JSON");
        }
        self
    }

    fn tables_from_json(&mut self, object: Map<String, serde_json::Value>) -> Tables {
        let mut tables = Tables::new();
        for (table_id, table) in object {
            let serde_json::Value::Object(rows) = table else {
                self.cell_invalid(Some(&table_id), None, None, None);
                continue;
            };
            let mut valid_table = Table::new();
            for (row_id, row) in rows {
                let serde_json::Value::Object(cells) = row else {
                    self.cell_invalid(Some(&table_id), Some(&row_id), None, None);
                    continue;
                };
                let mut valid_row = Row::new();
                for (cell_id, cell) in cells {
                    match Value::from_json(&cell) {
                        Some(cell) => {
                            valid_row.insert(cell_id, cell);
                        }
                        None => self.cell_invalid(Some(&table_id), Some(&row_id), Some(&cell_id), None),
                    }
                }
                valid_table.insert(row_id, valid_row);
            }
            tables.insert(table_id, valid_table);
        }
        tables
    }

    fn values_from_json(&mut self, object: Map<String, serde_json::Value>) -> Values {
        let mut values = Values::new();
        for (value_id, value) in object {
            match Value::from_json(&value) {
                Some(value) => {
                    values.insert(value_id, value);
                }
                None => self.value_invalid(Some(&value_id), None),
            }
        }
        values
    }
}

fn expect_object(json: serde_json::Value, what: &str) -> Result<Map<String, serde_json::Value>> {
    match json {
        serde_json::Value::Object(object) => Ok(object),
        other => Err(StoreError::InvalidContent(format!(
            "expected {what} object, found {}",
            json_kind(&other)
        ))),
    }
}

fn split_pair(json: serde_json::Value, what: &str) -> Result<(serde_json::Value, serde_json::Value)> {
    match json {
        serde_json::Value::Array(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            let first = items.next().unwrap_or_else(|| json!({}));
            let second = items.next().unwrap_or_else(|| json!({}));
            Ok((first, second))
        }
        other => Err(StoreError::InvalidContent(format!(
            "expected {what} pair, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_formats_numbers_like_javascript() {
        let mut store = Store::new();
        store.set_cell("t", "r", "a", 1).set_cell("t", "r", "b", 1.5).set_value("v", "x");
        assert_eq!(store.get_tables_json(), r#"{"t":{"r":{"a":1,"b":1.5}}}"#);
        assert_eq!(store.get_values_json(), r#"{"v":"x"}"#);
        assert_eq!(store.get_json(), r#"[{"t":{"r":{"a":1,"b":1.5}}},{"v":"x"}]"#);
    }

    #[test]
    fn test_import_round_trip() {
        let mut store = Store::new();
        store.set_json(r#"[{"pets":{"fido":{"species":"dog","legs":4}}},{"open":true}]"#);
        assert_eq!(store.get_cell("pets", "fido", "legs"), Some(Value::from(4)));
        assert_eq!(store.get_value("open"), Some(Value::from(true)));

        let mut copy = Store::new();
        copy.set_json(&store.get_json());
        assert_eq!(copy.get_content(), store.get_content());
    }

    #[test]
    fn test_malformed_import_leaves_store_unchanged() {
        let mut store = Store::new();
        store.set_cell("t", "r", "c", 1);
        assert!(matches!(store.try_set_tables_json("{"), Err(StoreError::Json(_))));
        assert!(matches!(store.try_set_tables_json("[1]"), Err(StoreError::InvalidContent(_))));
        assert!(matches!(store.try_set_json(r#"{"a":1}"#), Err(StoreError::InvalidContent(_))));
        store.set_values_json("nonsense");
        assert_eq!(store.get_cell("t", "r", "c"), Some(Value::from(1)));
        assert!(!store.has_values());
    }

    #[test]
    fn test_import_skips_invalid_cells() {
        let mut store = Store::new();
        store.set_tables_json(r#"{"t":{"r":{"a":1,"b":[1],"c":null}},"u":3}"#);
        assert_eq!(store.get_table_ids(), vec!["t"]);
        assert_eq!(store.get_cell_ids("t", "r"), vec!["a"]);
    }

    #[test]
    fn test_schema_json() {
        let mut store = Store::new();
        store.set_tables_schema_json(r#"{"pets":{"species":{"type":"string"},"legs":{"type":"number","default":4}}}"#);
        assert_eq!(
            store.get_tables_schema_json(),
            r#"{"pets":{"species":{"type":"string"},"legs":{"type":"number","default":4}}}"#
        );
        assert_eq!(store.get_values_schema_json(), "{}");
        assert!(store.try_set_values_schema_json("{}").is_err());

        store.set_schema_json(r#"[{}, {"open":{"type":"boolean","default":true}}]"#);
        assert_eq!(store.get_value("open"), Some(Value::from(true)));
        assert_eq!(
            store.get_schema_json(),
            r#"[{"pets":{"species":{"type":"string"},"legs":{"type":"number","default":4}}},{"open":{"type":"boolean","default":true}}]"#
        );

        store.del_schema();
        assert_eq!(store.get_schema_json(), "[{},{}]");
    }
}
