//! Validation and mutation
//!
//! Public setters validate their input (against the schema if one is set),
//! record anything rejected as invalid, then apply the remainder through the
//! `*_valid_*` primitives, which keep the id/count accumulators and the
//! mutation hooks in step with the data.

use super::{Row, Store, Table, Tables, Values};
use crate::changes::{record_id_change, Changes, IdChange};
use crate::pool::IdPool;
use crate::schema::{
    normalize_tables_schema, normalize_values_schema, Defaults, TablesSchema, ValuesSchema,
};
use crate::value::{Id, Value};
use indexmap::IndexMap;
use tracing::{debug, warn};

impl Store {
    // Setters

    pub fn set_content(&mut self, tables: Tables, values: Values) -> &mut Self {
        self.fluent(|store| {
            store.set_tables(tables);
            store.set_values(values);
        })
    }

    /// Replace all tables. An empty map clears them.
    pub fn set_tables(&mut self, tables: Tables) -> &mut Self {
        self.fluent(|store| {
            let valid = store.validate_tables(tables);
            store.set_valid_tables(valid);
        })
    }

    pub fn set_table(&mut self, table_id: &str, table: Table) -> &mut Self {
        self.fluent(|store| {
            if let Some(valid) = store.validate_table(table_id, table) {
                store.set_valid_table(table_id, valid);
            }
        })
    }

    pub fn set_row(&mut self, table_id: &str, row_id: &str, row: Row) -> &mut Self {
        self.fluent(|store| {
            if let Some(valid) = store.validate_row(table_id, Some(row_id), row, false) {
                store.ensure_table(table_id);
                store.set_valid_row(table_id, row_id, valid, false);
            }
        })
    }

    /// Add a row under a fresh id from the table's pool and return that id,
    /// or `None` if the row was rejected
    pub fn add_row(&mut self, table_id: &str, row: Row, reuse_row_ids: bool) -> Option<Id> {
        if self.transactions < 0 {
            warn!(table_id, "ignoring row added from a display listener");
            return None;
        }
        self.transaction(|store| {
            let valid = store.validate_row(table_id, None, row, false)?;
            store.ensure_table(table_id);
            let pool_size = store.config.row_id_pool_size;
            let pool = store
                .row_id_pools
                .entry(table_id.to_string())
                .or_insert_with(|| IdPool::new(pool_size));
            let tables = &store.tables;
            let row_id = pool.take_row_id(reuse_row_ids, |candidate| {
                tables.get(table_id).is_some_and(|table| table.contains_key(candidate))
            });
            store.set_valid_row(table_id, &row_id, valid, false);
            Some(row_id)
        })
    }

    /// Set the given cells of a row, leaving the others untouched
    pub fn set_partial_row(&mut self, table_id: &str, row_id: &str, partial_row: Row) -> &mut Self {
        self.fluent(|store| {
            if let Some(valid) = store.validate_row(table_id, Some(row_id), partial_row, true) {
                store.ensure_table(table_id);
                let row_exists = store.has_row(table_id, row_id);
                if row_exists {
                    for (cell_id, cell) in valid {
                        store.set_valid_cell(table_id, row_id, &cell_id, cell);
                    }
                } else {
                    let mut row = valid;
                    store.add_defaults_to_row(&mut row, table_id, Some(row_id));
                    store.set_valid_row(table_id, row_id, row, false);
                }
            }
        })
    }

    pub fn set_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str, cell: impl Into<Value>) -> &mut Self {
        let cell = cell.into();
        self.fluent(|store| {
            if let Some(valid) = store.validated_cell(table_id, Some(row_id), cell_id, cell) {
                store.set_cell_into_row(table_id, row_id, cell_id, valid);
            }
        })
    }

    /// Set a cell from its current value
    pub fn set_cell_with(
        &mut self,
        table_id: &str,
        row_id: &str,
        cell_id: &str,
        mapper: impl FnOnce(Option<&Value>) -> Value,
    ) -> &mut Self {
        let cell = mapper(self.get_cell(table_id, row_id, cell_id).as_ref());
        self.set_cell(table_id, row_id, cell_id, cell)
    }

    /// Replace all values. An empty map clears them (schema defaults are
    /// kept).
    pub fn set_values(&mut self, values: Values) -> &mut Self {
        self.fluent(|store| {
            if let Some(valid) = store.validate_values(values, false) {
                store.set_valid_values(valid);
            }
        })
    }

    pub fn set_partial_values(&mut self, partial_values: Values) -> &mut Self {
        self.fluent(|store| {
            if let Some(valid) = store.validate_values(partial_values, true) {
                for (value_id, value) in valid {
                    store.set_valid_value(&value_id, value);
                }
            }
        })
    }

    pub fn set_value(&mut self, value_id: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        self.fluent(|store| {
            if let Some(valid) = store.validated_value(value_id, value) {
                store.set_valid_value(value_id, valid);
            }
        })
    }

    /// Set a value from its current value
    pub fn set_value_with(&mut self, value_id: &str, mapper: impl FnOnce(Option<&Value>) -> Value) -> &mut Self {
        let value = mapper(self.get_value(value_id).as_ref());
        self.set_value(value_id, value)
    }

    // Deletion

    pub fn del_tables(&mut self) -> &mut Self {
        self.fluent(|store| store.set_valid_tables(Tables::new()))
    }

    pub fn del_table(&mut self, table_id: &str) -> &mut Self {
        self.fluent(|store| {
            if store.has_table(table_id) {
                store.del_valid_table(table_id);
            }
        })
    }

    pub fn del_row(&mut self, table_id: &str, row_id: &str) -> &mut Self {
        self.fluent(|store| {
            if store.has_row(table_id, row_id) {
                store.del_valid_row(table_id, row_id);
            }
        })
    }

    /// Delete a cell. A cell with a schema default is reset to it unless
    /// `force` is set, in which case the whole row is deleted.
    pub fn del_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str, force: bool) -> &mut Self {
        self.fluent(|store| {
            if store.has_cell(table_id, row_id, cell_id) {
                store.del_valid_cell(table_id, row_id, cell_id, force);
            }
        })
    }

    /// Delete all values; those with schema defaults are reset to them
    pub fn del_values(&mut self) -> &mut Self {
        self.fluent(|store| store.set_valid_values(Values::new()))
    }

    /// Delete a value. A value with a schema default is reset to it unless
    /// `force` is set.
    pub fn del_value(&mut self, value_id: &str, force: bool) -> &mut Self {
        self.fluent(|store| {
            if store.has_value(value_id) {
                store.del_valid_value(value_id, force);
            }
        })
    }

    /// Apply a set of changes; `None` entries delete
    pub fn apply_changes(&mut self, changes: Changes) -> &mut Self {
        self.fluent(|store| {
            for (table_id, table) in changes.tables {
                match table {
                    None => {
                        store.del_table(&table_id);
                    }
                    Some(rows) => {
                        for (row_id, row) in rows {
                            match row {
                                None => {
                                    store.del_row(&table_id, &row_id);
                                }
                                Some(cells) => {
                                    for (cell_id, cell) in cells {
                                        store.set_or_del_cell(&table_id, &row_id, &cell_id, cell);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            for (value_id, value) in changes.values {
                store.set_or_del_value(&value_id, value);
            }
        })
    }

    pub(crate) fn set_or_del_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str, cell: Option<Value>) {
        match cell {
            Some(cell) => self.set_cell(table_id, row_id, cell_id, cell),
            None => self.del_cell(table_id, row_id, cell_id, true),
        };
    }

    pub(crate) fn set_or_del_value(&mut self, value_id: &str, value: Option<Value>) {
        match value {
            Some(value) => self.set_value(value_id, value),
            None => self.del_value(value_id, true),
        };
    }

    // Schemas

    /// Set the tables schema and re-validate all existing tables against it.
    /// An empty schema is ignored.
    pub fn set_tables_schema(&mut self, schema: TablesSchema) -> &mut Self {
        let Some(schema) = normalize_tables_schema(schema) else {
            warn!("ignoring empty tables schema");
            return self;
        };
        self.fluent(|store| {
            store.table_defaults = schema
                .iter()
                .map(|(table_id, table)| (table_id.clone(), Defaults::from_schema(table)))
                .collect();
            store.tables_schema = Some(schema);
            // Conforming cells stay untouched; only invalid ones are removed or defaulted
            let tables = store.get_tables();
            let valid = store.validate_tables(tables);
            store.set_valid_tables(valid);
            debug!("tables schema applied");
        })
    }

    /// Set the values schema and re-validate all existing values against
    /// it. An empty schema is ignored.
    pub fn set_values_schema(&mut self, schema: ValuesSchema) -> &mut Self {
        let Some(schema) = normalize_values_schema(schema) else {
            warn!("ignoring empty values schema");
            return self;
        };
        self.fluent(|store| {
            store.value_defaults = Defaults::from_schema(&schema);
            store.values_schema = Some(schema);
            let values = store.get_values();
            let valid = store.validate_values(values, false).unwrap_or_default();
            store.set_valid_values(valid);
            debug!("values schema applied");
        })
    }

    pub fn set_schema(&mut self, tables_schema: TablesSchema, values_schema: ValuesSchema) -> &mut Self {
        self.fluent(|store| {
            store.set_tables_schema(tables_schema);
            store.set_values_schema(values_schema);
        })
    }

    pub fn del_tables_schema(&mut self) -> &mut Self {
        self.fluent(|store| {
            store.tables_schema = None;
            store.table_defaults.clear();
        })
    }

    pub fn del_values_schema(&mut self) -> &mut Self {
        self.fluent(|store| {
            store.values_schema = None;
            store.value_defaults = Defaults::default();
        })
    }

    pub fn del_schema(&mut self) -> &mut Self {
        self.fluent(|store| {
            store.del_tables_schema();
            store.del_values_schema();
        })
    }

    // Validation

    /// The cell to store, if any. A cell of the wrong type falls back to the
    /// schema default; either way a rejected cell is recorded as invalid.
    pub(super) fn validated_cell(
        &mut self,
        table_id: &str,
        row_id: Option<&str>,
        cell_id: &str,
        cell: Value,
    ) -> Option<Value> {
        let outcome = match &self.tables_schema {
            Some(schema) => match schema.get(table_id).and_then(|table| table.get(cell_id)) {
                Some(cell_schema) if cell.value_type() == Some(cell_schema.value_type) => Ok(cell),
                Some(cell_schema) => Err((cell, cell_schema.default.clone())),
                None => Err((cell, None)),
            },
            None if cell.is_valid() => Ok(cell),
            None => Err((cell, None)),
        };
        match outcome {
            Ok(cell) => Some(cell),
            Err((cell, default)) => {
                self.cell_invalid(Some(table_id), row_id, Some(cell_id), Some(cell));
                default
            }
        }
    }

    pub(super) fn validated_value(&mut self, value_id: &str, value: Value) -> Option<Value> {
        let outcome = match &self.values_schema {
            Some(schema) => match schema.get(value_id) {
                Some(value_schema) if value.value_type() == Some(value_schema.value_type) => Ok(value),
                Some(value_schema) => Err((value, value_schema.default.clone())),
                None => Err((value, None)),
            },
            None if value.is_valid() => Ok(value),
            None => Err((value, None)),
        };
        match outcome {
            Ok(value) => Some(value),
            Err((value, default)) => {
                self.value_invalid(Some(value_id), Some(value));
                default
            }
        }
    }

    /// Validate every cell; a row left empty is invalid as a whole.
    /// Defaults are added unless validating a partial row.
    pub(super) fn validate_row(
        &mut self,
        table_id: &str,
        row_id: Option<&str>,
        row: Row,
        partial: bool,
    ) -> Option<Row> {
        let mut valid = Row::new();
        for (cell_id, cell) in row {
            if let Some(cell) = self.validated_cell(table_id, row_id, &cell_id, cell) {
                valid.insert(cell_id, cell);
            }
        }
        if valid.is_empty() {
            self.cell_invalid(Some(table_id), row_id, None, None);
            return None;
        }
        if !partial {
            self.add_defaults_to_row(&mut valid, table_id, row_id);
        }
        Some(valid)
    }

    pub(super) fn validate_table(&mut self, table_id: &str, table: Table) -> Option<Table> {
        if self
            .tables_schema
            .as_ref()
            .is_some_and(|schema| !schema.contains_key(table_id))
        {
            self.cell_invalid(Some(table_id), None, None, None);
            return None;
        }
        let mut valid = Table::new();
        for (row_id, row) in table {
            if let Some(row) = self.validate_row(table_id, Some(&row_id), row, false) {
                valid.insert(row_id, row);
            }
        }
        if valid.is_empty() {
            self.cell_invalid(Some(table_id), None, None, None);
            return None;
        }
        Some(valid)
    }

    pub(super) fn validate_tables(&mut self, tables: Tables) -> Tables {
        let mut valid = Tables::new();
        for (table_id, table) in tables {
            if let Some(table) = self.validate_table(&table_id, table) {
                valid.insert(table_id, table);
            }
        }
        valid
    }

    /// Validate every value. A non-empty input left empty is invalid;
    /// defaults are added unless validating partial values.
    pub(super) fn validate_values(&mut self, values: Values, partial: bool) -> Option<Values> {
        let was_empty = values.is_empty();
        let mut valid = Values::new();
        for (value_id, value) in values {
            if let Some(value) = self.validated_value(&value_id, value) {
                valid.insert(value_id, value);
            }
        }
        if valid.is_empty() && !was_empty {
            self.value_invalid(None, None);
            return None;
        }
        if !partial {
            for (value_id, default) in self.value_defaults.defaulted.clone() {
                valid.entry(value_id).or_insert(default);
            }
            for value_id in self.value_defaults.required.clone() {
                if !valid.contains_key(&value_id) {
                    self.value_invalid(Some(&value_id), None);
                }
            }
        }
        Some(valid)
    }

    pub(super) fn add_defaults_to_row(&mut self, row: &mut Row, table_id: &str, row_id: Option<&str>) {
        let Some(defaults) = self.table_defaults.get(table_id) else {
            return;
        };
        for (cell_id, default) in &defaults.defaulted {
            if !row.contains_key(cell_id) {
                row.insert(cell_id.clone(), default.clone());
            }
        }
        let missing: Vec<Id> = defaults
            .required
            .iter()
            .filter(|cell_id| !row.contains_key(*cell_id))
            .cloned()
            .collect();
        for cell_id in missing {
            self.cell_invalid(Some(table_id), row_id, Some(&cell_id), None);
        }
    }

    pub(super) fn cell_invalid(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        cell_id: Option<&str>,
        invalid_cell: Option<Value>,
    ) {
        debug!(?table_id, ?row_id, ?cell_id, ?invalid_cell, "invalid cell");
        self.log
            .invalid_cells
            .entry(table_id.map(str::to_string))
            .or_default()
            .entry(row_id.map(str::to_string))
            .or_default()
            .entry(cell_id.map(str::to_string))
            .or_default()
            .push(invalid_cell);
    }

    pub(super) fn value_invalid(&mut self, value_id: Option<&str>, invalid_value: Option<Value>) {
        debug!(?value_id, ?invalid_value, "invalid value");
        self.log
            .invalid_values
            .entry(value_id.map(str::to_string))
            .or_default()
            .push(invalid_value);
    }

    // Valid mutation primitives; callers are inside a transaction

    fn ensure_table(&mut self, table_id: &str) {
        if !self.tables.contains_key(table_id) {
            self.tables.insert(table_id.to_string(), Table::new());
            self.table_cell_counts.insert(table_id.to_string(), IndexMap::new());
            record_id_change(&mut self.log.changed_table_ids, table_id, IdChange::Added);
        }
    }

    fn set_cell_into_row(&mut self, table_id: &str, row_id: &str, cell_id: &str, cell: Value) {
        self.ensure_table(table_id);
        if self.has_row(table_id, row_id) {
            self.set_valid_cell(table_id, row_id, cell_id, cell);
        } else {
            let mut row = Row::from([(cell_id.to_string(), cell)]);
            self.add_defaults_to_row(&mut row, table_id, Some(row_id));
            self.set_valid_row(table_id, row_id, row, false);
        }
    }

    pub(super) fn set_valid_tables(&mut self, tables: Tables) {
        let stale: Vec<Id> = self
            .tables
            .keys()
            .filter(|table_id| !tables.contains_key(*table_id))
            .cloned()
            .collect();
        for (table_id, table) in tables {
            self.set_valid_table(&table_id, table);
        }
        for table_id in stale {
            self.del_valid_table(&table_id);
        }
    }

    fn set_valid_table(&mut self, table_id: &str, table: Table) {
        self.ensure_table(table_id);
        let stale: Vec<Id> = self
            .get_row_ids(table_id)
            .into_iter()
            .filter(|row_id| !table.contains_key(row_id))
            .collect();
        for (row_id, row) in table {
            self.set_valid_row(table_id, &row_id, row, false);
        }
        for row_id in stale {
            self.del_valid_row(table_id, &row_id);
        }
    }

    fn set_valid_row(&mut self, table_id: &str, row_id: &str, row: Row, force_del: bool) {
        let Some(table) = self.tables.get_mut(table_id) else {
            return;
        };
        if !table.contains_key(row_id) {
            table.insert(row_id.to_string(), Row::new());
            self.row_ids_changed(table_id, row_id, IdChange::Added);
        }
        let stale: Vec<Id> = self
            .get_cell_ids(table_id, row_id)
            .into_iter()
            .filter(|cell_id| !row.contains_key(cell_id))
            .collect();
        for (cell_id, cell) in row {
            self.set_valid_cell(table_id, row_id, &cell_id, cell);
        }
        for cell_id in stale {
            self.del_valid_cell(table_id, row_id, &cell_id, force_del);
        }
    }

    fn set_valid_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str, cell: Value) {
        let Some(row) = self
            .tables
            .get_mut(table_id)
            .and_then(|table| table.get_mut(row_id))
        else {
            return;
        };
        let old = row.get(cell_id).cloned();
        if old.as_ref() == Some(&cell) {
            return;
        }
        row.insert(cell_id.to_string(), cell.clone());
        if old.is_none() {
            self.cell_ids_changed(table_id, row_id, cell_id, IdChange::Added);
        }
        self.cell_changed(table_id, row_id, cell_id, old, Some(cell));
    }

    fn del_valid_table(&mut self, table_id: &str) {
        for row_id in self.get_row_ids(table_id) {
            self.del_valid_row(table_id, &row_id);
        }
    }

    fn del_valid_row(&mut self, table_id: &str, row_id: &str) {
        for cell_id in self.get_cell_ids(table_id, row_id) {
            self.remove_cell(table_id, row_id, &cell_id);
        }
        self.prune_row(table_id, row_id);
    }

    fn del_valid_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str, force: bool) {
        let default = self
            .table_defaults
            .get(table_id)
            .and_then(|defaults| defaults.defaulted.get(cell_id))
            .cloned();
        match default {
            Some(default) if !force => self.set_valid_cell(table_id, row_id, cell_id, default),
            Some(_) => self.del_valid_row(table_id, row_id),
            None => {
                self.remove_cell(table_id, row_id, cell_id);
                self.prune_row(table_id, row_id);
            }
        }
    }

    fn remove_cell(&mut self, table_id: &str, row_id: &str, cell_id: &str) {
        let old = self
            .tables
            .get_mut(table_id)
            .and_then(|table| table.get_mut(row_id))
            .and_then(|row| row.shift_remove(cell_id));
        if old.is_some() {
            self.cell_ids_changed(table_id, row_id, cell_id, IdChange::Removed);
            self.cell_changed(table_id, row_id, cell_id, old, None);
        }
    }

    /// Remove the row if it has no cells left, then the table if it has no
    /// rows left
    fn prune_row(&mut self, table_id: &str, row_id: &str) {
        let Some(table) = self.tables.get_mut(table_id) else {
            return;
        };
        if table.get(row_id).is_some_and(Row::is_empty) {
            table.shift_remove(row_id);
            if let Some(pool) = self.row_id_pools.get_mut(table_id) {
                pool.release_row_id(row_id);
            }
            self.row_ids_changed(table_id, row_id, IdChange::Removed);
        }
        if self.tables.get(table_id).is_some_and(Table::is_empty) {
            self.tables.shift_remove(table_id);
            self.table_cell_counts.remove(table_id);
            self.row_id_pools.remove(table_id);
            record_id_change(&mut self.log.changed_table_ids, table_id, IdChange::Removed);
        }
    }

    pub(super) fn set_valid_values(&mut self, values: Values) {
        let stale: Vec<Id> = self
            .values
            .keys()
            .filter(|value_id| !values.contains_key(*value_id))
            .cloned()
            .collect();
        for (value_id, value) in values {
            self.set_valid_value(&value_id, value);
        }
        for value_id in stale {
            self.del_valid_value(&value_id, false);
        }
    }

    fn set_valid_value(&mut self, value_id: &str, value: Value) {
        let old = self.values.get(value_id).cloned();
        if old.as_ref() == Some(&value) {
            return;
        }
        self.values.insert(value_id.to_string(), value.clone());
        if old.is_none() {
            record_id_change(&mut self.log.changed_value_ids, value_id, IdChange::Added);
        }
        self.value_changed(value_id, old, Some(value));
    }

    fn del_valid_value(&mut self, value_id: &str, force: bool) {
        let default = self.value_defaults.defaulted.get(value_id).cloned();
        match default {
            Some(default) if !force => self.set_valid_value(value_id, default),
            _ => {
                if let Some(old) = self.values.shift_remove(value_id) {
                    record_id_change(&mut self.log.changed_value_ids, value_id, IdChange::Removed);
                    self.value_changed(value_id, Some(old), None);
                }
            }
        }
    }

    // Accumulators

    fn row_ids_changed(&mut self, table_id: &str, row_id: &str, change: IdChange) {
        record_id_change(
            self.log
                .changed_row_ids
                .entry(table_id.to_string())
                .or_default(),
            row_id,
            change,
        );
        let delta = match change {
            IdChange::Added => 1,
            IdChange::Removed => -1,
        };
        *self
            .log
            .changed_row_count
            .entry(table_id.to_string())
            .or_insert(0) += delta;
    }

    fn cell_ids_changed(&mut self, table_id: &str, row_id: &str, cell_id: &str, change: IdChange) {
        let counts = self.table_cell_counts.entry(table_id.to_string()).or_default();
        let count = counts.get(cell_id).copied().unwrap_or(0);
        let table_changed = match change {
            IdChange::Added => {
                counts.insert(cell_id.to_string(), count + 1);
                count == 0
            }
            IdChange::Removed if count <= 1 => {
                counts.shift_remove(cell_id);
                true
            }
            IdChange::Removed => {
                counts.insert(cell_id.to_string(), count - 1);
                false
            }
        };
        if table_changed {
            record_id_change(
                self.log
                    .changed_table_cell_ids
                    .entry(table_id.to_string())
                    .or_default(),
                cell_id,
                change,
            );
        }
        record_id_change(
            self.log
                .changed_cell_ids
                .entry(table_id.to_string())
                .or_default()
                .entry(row_id.to_string())
                .or_default(),
            cell_id,
            change,
        );
    }

    fn cell_changed(&mut self, table_id: &str, row_id: &str, cell_id: &str, old: Option<Value>, new: Option<Value>) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.cell_changed(table_id, row_id, cell_id, new.as_ref());
        }
        self.log
            .changed_cells
            .entry(table_id.to_string())
            .or_default()
            .entry(row_id.to_string())
            .or_default()
            .entry(cell_id.to_string())
            .or_insert((old, None))
            .1 = new;
    }

    fn value_changed(&mut self, value_id: &str, old: Option<Value>, new: Option<Value>) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.value_changed(value_id, new.as_ref());
        }
        self.log
            .changed_values
            .entry(value_id.to_string())
            .or_insert((old, None))
            .1 = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::ListenerEvent;
    use crate::schema::CellSchema;
    use crate::value::ValueType;
    use pretty_assertions::assert_eq;

    fn row(cells: &[(&str, Value)]) -> Row {
        cells.iter().map(|(id, cell)| (id.to_string(), cell.clone())).collect()
    }

    fn pets_schema() -> TablesSchema {
        IndexMap::from([(
            "pets".to_string(),
            IndexMap::from([
                ("species".to_string(), CellSchema::new(ValueType::String)),
                ("legs".to_string(), CellSchema::with_default(ValueType::Number, 4)),
                ("sold".to_string(), CellSchema::with_default(ValueType::Boolean, false)),
            ]),
        )])
    }

    #[test]
    fn test_set_and_delete_cascades() {
        let mut store = Store::new();
        store.set_cell("t1", "r1", "c1", 1).set_cell("t1", "r1", "c2", "x");
        assert_eq!(store.get_row("t1", "r1"), row(&[("c1", 1.into()), ("c2", "x".into())]));

        store.del_cell("t1", "r1", "c1", false);
        assert!(store.has_row("t1", "r1"));
        store.del_cell("t1", "r1", "c2", false);
        assert!(!store.has_row("t1", "r1"));
        assert!(!store.has_table("t1"));
        assert!(store.get_table_cell_ids("t1").is_empty());
    }

    #[test]
    fn test_invalid_cells_without_schema() {
        let mut store = Store::new();
        store.set_cell("t1", "r1", "c1", f64::NAN);
        assert!(!store.has_tables());
        store.set_row("t1", "r1", Row::new());
        assert!(!store.has_tables());
        store.set_table("t1", Table::new());
        assert!(!store.has_tables());
    }

    #[test]
    fn test_add_row_uses_pooled_ids() {
        let mut store = Store::new();
        let first = store.add_row("t", row(&[("a", 1.into())]), true);
        let second = store.add_row("t", row(&[("a", 2.into())]), true);
        assert_eq!(first.as_deref(), Some("0"));
        assert_eq!(second.as_deref(), Some("1"));
        store.del_row("t", "0");
        assert_eq!(store.add_row("t", row(&[("a", 3.into())]), true).as_deref(), Some("0"));
        assert_eq!(store.add_row("t", row(&[("a", 4.into())]), false).as_deref(), Some("2"));
        assert_eq!(store.add_row("t", Row::new(), true), None);
    }

    #[test]
    fn test_schema_defaults_and_coercion() {
        let mut store = Store::new();
        store.set_tables_schema(pets_schema());
        store.set_row("pets", "fido", row(&[("species", "dog".into())]));
        assert_eq!(
            store.get_row("pets", "fido"),
            row(&[("species", "dog".into()), ("legs", 4.into()), ("sold", false.into())])
        );

        // Wrong type falls back to the default
        store.set_cell("pets", "fido", "legs", "three");
        assert_eq!(store.get_cell("pets", "fido", "legs"), Some(Value::from(4)));

        // Cells and tables outside the schema are rejected
        store.set_cell("pets", "fido", "color", "brown");
        assert_eq!(store.get_cell("pets", "fido", "color"), None);
        store.set_cell("cars", "c1", "make", "x");
        assert!(!store.has_table("cars"));

        // Deleting a defaulted cell resets it; forcing removes the row
        store.set_cell("pets", "fido", "legs", 3);
        store.del_cell("pets", "fido", "legs", false);
        assert_eq!(store.get_cell("pets", "fido", "legs"), Some(Value::from(4)));
        store.del_cell("pets", "fido", "legs", true);
        assert!(!store.has_row("pets", "fido"));
    }

    #[test]
    fn test_schema_revalidates_existing_data() {
        let mut store = Store::new();
        store
            .set_row("pets", "fido", row(&[("species", "dog".into()), ("color", "brown".into())]))
            .set_row("cars", "c1", row(&[("make", "x".into())]));
        store.set_tables_schema(pets_schema());
        assert_eq!(store.get_table_ids(), vec!["pets"]);
        assert_eq!(
            store.get_row("pets", "fido"),
            row(&[("species", "dog".into()), ("legs", 4.into()), ("sold", false.into())])
        );

        store.del_tables_schema();
        store.set_cell("pets", "fido", "color", "brown");
        assert_eq!(store.get_cell("pets", "fido", "color"), Some(Value::from("brown")));
    }

    #[test]
    fn test_schema_leaves_conforming_cells_alone() {
        let mut store = Store::new();
        store
            .set_row("pets", "fido", row(&[("species", "dog".into()), ("legs", 3.into())]))
            .set_row("pets", "rex", row(&[("species", "cat".into()), ("legs", "four".into())]));
        let changed = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = changed.clone();
        store.add_cell_listener(
            None,
            None,
            None,
            move |_, event| {
                if let ListenerEvent::Cell { row_id, cell_id, .. } = event {
                    sink.lock().push(format!("{row_id}/{cell_id}"));
                }
            },
            false,
        );

        store.set_tables_schema(pets_schema());
        let mut changed = changed.lock().clone();
        changed.sort();
        assert_eq!(changed, vec!["fido/sold", "rex/legs", "rex/sold"]);
    }

    #[test]
    fn test_values_with_schema() {
        let mut store = Store::new();
        store.set_values_schema(IndexMap::from([
            ("open".to_string(), CellSchema::with_default(ValueType::Boolean, true)),
            ("employees".to_string(), CellSchema::new(ValueType::Number)),
        ]));
        assert_eq!(store.get_value("open"), Some(Value::from(true)));

        store.set_value("employees", 3).set_value("open", "yes");
        assert_eq!(store.get_value("employees"), Some(Value::from(3)));
        assert_eq!(store.get_value("open"), Some(Value::from(true)));

        store.set_value("open", false).del_value("open", false);
        assert_eq!(store.get_value("open"), Some(Value::from(true)));
        store.del_values();
        assert_eq!(store.get_value_ids(), vec!["open"]);
        store.del_value("open", true);
        assert!(!store.has_values());
    }

    #[test]
    fn test_partial_row_and_values() {
        let mut store = Store::new();
        store.set_row("t", "r", row(&[("a", 1.into()), ("b", 2.into())]));
        store.set_partial_row("t", "r", row(&[("b", 3.into()), ("c", 4.into())]));
        assert_eq!(store.get_row("t", "r"), row(&[("a", 1.into()), ("b", 3.into()), ("c", 4.into())]));

        store.set_values(row(&[("x", 1.into())]));
        store.set_partial_values(row(&[("y", 2.into())]));
        assert_eq!(store.get_values(), row(&[("x", 1.into()), ("y", 2.into())]));
        store.set_values(Values::new());
        assert!(!store.has_values());
    }

    #[test]
    fn test_mappers() {
        let mut store = Store::new();
        store.set_cell_with("t", "r", "n", |cell| {
            Value::from(cell.and_then(Value::as_f64).unwrap_or(0.0) + 1.0)
        });
        store.set_cell_with("t", "r", "n", |cell| {
            Value::from(cell.and_then(Value::as_f64).unwrap_or(0.0) + 1.0)
        });
        assert_eq!(store.get_cell("t", "r", "n"), Some(Value::from(2)));
        store.set_value_with("v", |value| Value::from(value.is_none()));
        assert_eq!(store.get_value("v"), Some(Value::from(true)));
    }

    #[test]
    fn test_apply_changes() {
        let mut store = Store::new();
        store.set_row("t1", "r1", row(&[("a", 1.into()), ("b", 2.into())]));
        store.set_row("t2", "r1", row(&[("a", 1.into())]));
        store.set_value("v1", 1);

        let changes: Changes = serde_json::from_str(
            r#"[{"t1": {"r1": {"a": null, "c": 3}}, "t2": null, "t3": {"r9": {"z": true}}}, {"v1": null, "v2": "x"}, 1]"#,
        )
        .unwrap();
        store.apply_changes(changes);
        assert_eq!(store.get_row("t1", "r1"), row(&[("b", 2.into()), ("c", 3.into())]));
        assert!(!store.has_table("t2"));
        assert_eq!(store.get_cell("t3", "r9", "z"), Some(Value::from(true)));
        assert_eq!(store.get_values(), row(&[("v2", "x".into())]));
    }

    #[test]
    fn test_table_cell_counts() {
        let mut store = Store::new();
        store.set_cell("t", "r1", "a", 1).set_cell("t", "r2", "a", 1).set_cell("t", "r2", "b", 1);
        assert_eq!(store.get_table_cell_ids("t"), vec!["a", "b"]);
        store.del_row("t", "r2");
        assert_eq!(store.get_table_cell_ids("t"), vec!["a"]);
    }
}
