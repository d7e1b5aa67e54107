//! The reactive tabular store
//!
//! A [`Store`] holds tables (table → row → cell) and keyed values, an
//! optional schema for each, and the listener registry. Every write runs in
//! a transaction; listeners are notified once per distinct change when the
//! outermost transaction finishes.

mod json;
mod mutate;
mod transaction;

use crate::changes::{ChangedCells, ChangedIds, ChangedValues, InvalidCells, InvalidValues};
use crate::config::StoreConfig;
use crate::listeners::{
    Listener, ListenerEvent, ListenerId, ListenerKind, ListenerRegistry, ListenerStats,
    SortedRowIdsQuery,
};
use crate::path_index::PathKey;
use crate::pool::IdPool;
use crate::schema::{Defaults, TablesSchema, ValuesSchema};
use crate::value::{sort_cmp, Id, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type Row = IndexMap<Id, Value>;
pub type Table = IndexMap<Id, Row>;
pub type Tables = IndexMap<Id, Table>;
pub type Values = IndexMap<Id, Value>;

/// Hooks through which a layer above the store observes every applied
/// change. A store carries at most one set.
pub trait MutationHooks: Send + Sync {
    /// The outermost transaction started
    fn transaction_started(&mut self) {}

    /// A cell was set (`Some`) or deleted (`None`)
    fn cell_changed(&mut self, table_id: &str, row_id: &str, cell_id: &str, new_cell: Option<&Value>);

    /// A value was set (`Some`) or deleted (`None`)
    fn value_changed(&mut self, value_id: &str, new_value: Option<&Value>);

    /// Display listeners ran; did-finish listeners are next
    fn transaction_will_finish(&mut self) {}

    /// The outermost transaction completed
    fn transaction_finished(&mut self) {}
}

/// Accumulated effects of the current transaction
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    pub(crate) changed_table_ids: ChangedIds,
    pub(crate) changed_table_cell_ids: IndexMap<Id, ChangedIds>,
    pub(crate) changed_row_count: IndexMap<Id, i64>,
    pub(crate) changed_row_ids: IndexMap<Id, ChangedIds>,
    pub(crate) changed_cell_ids: IndexMap<Id, IndexMap<Id, ChangedIds>>,
    pub(crate) changed_cells: ChangedCells,
    pub(crate) invalid_cells: InvalidCells,
    pub(crate) changed_value_ids: ChangedIds,
    pub(crate) changed_values: ChangedValues,
    pub(crate) invalid_values: InvalidValues,
    pub(crate) had_tables: bool,
    pub(crate) had_values: bool,
}

/// In-memory reactive store of tables and values
pub struct Store {
    config: StoreConfig,
    tables: Tables,
    values: Values,
    tables_schema: Option<TablesSchema>,
    values_schema: Option<ValuesSchema>,
    table_defaults: HashMap<Id, Defaults>,
    value_defaults: Defaults,
    row_id_pools: HashMap<Id, IdPool>,
    table_cell_counts: HashMap<Id, IndexMap<Id, usize>>,
    /// Nesting depth; -1 while display listeners run
    transactions: i32,
    log: TransactionState,
    registry: ListenerRegistry,
    hooks: Option<Box<dyn MutationHooks>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("tables", &self.tables)
            .field("values", &self.values)
            .field("tables_schema", &self.tables_schema)
            .field("values_schema", &self.values_schema)
            .field("transactions", &self.transactions)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            registry: ListenerRegistry::new(config.listener_id_pool_size),
            config,
            tables: Tables::new(),
            values: Values::new(),
            tables_schema: None,
            values_schema: None,
            table_defaults: HashMap::new(),
            value_defaults: Defaults::default(),
            row_id_pools: HashMap::new(),
            table_cell_counts: HashMap::new(),
            transactions: 0,
            log: TransactionState::default(),
            hooks: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn set_mutation_hooks(&mut self, hooks: Box<dyn MutationHooks>) {
        self.hooks = Some(hooks);
    }

    /// Whether a mergeable layer is attached
    pub fn is_mergeable(&self) -> bool {
        self.hooks.is_some()
    }

    // Getters

    pub fn get_content(&self) -> (Tables, Values) {
        (self.get_tables(), self.get_values())
    }

    pub fn get_tables(&self) -> Tables {
        self.tables.clone()
    }

    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    pub fn get_table_ids(&self) -> Vec<Id> {
        self.tables.keys().cloned().collect()
    }

    pub fn get_table(&self, table_id: &str) -> Table {
        self.tables.get(table_id).cloned().unwrap_or_default()
    }

    pub fn has_table(&self, table_id: &str) -> bool {
        self.tables.contains_key(table_id)
    }

    /// Ids of every cell used by any row of the table
    pub fn get_table_cell_ids(&self, table_id: &str) -> Vec<Id> {
        self.table_cell_counts
            .get(table_id)
            .map(|counts| counts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_table_cell(&self, table_id: &str, cell_id: &str) -> bool {
        self.table_cell_counts
            .get(table_id)
            .is_some_and(|counts| counts.contains_key(cell_id))
    }

    pub fn get_row_count(&self, table_id: &str) -> usize {
        self.tables.get(table_id).map_or(0, IndexMap::len)
    }

    pub fn get_row_ids(&self, table_id: &str) -> Vec<Id> {
        self.tables
            .get(table_id)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Row ids sorted by a cell (or by row id when `cell_id` is `None`),
    /// then paginated. The sort is stable; missing cells sort first.
    pub fn get_sorted_row_ids(
        &self,
        table_id: &str,
        cell_id: Option<&str>,
        descending: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Vec<Id> {
        let Some(table) = self.tables.get(table_id) else {
            return Vec::new();
        };
        let mut rows: Vec<(&Id, Option<Value>)> = table
            .iter()
            .map(|(row_id, row)| {
                let key = match cell_id {
                    Some(cell_id) => row.get(cell_id).cloned(),
                    None => Some(Value::String(row_id.clone())),
                };
                (row_id, key)
            })
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            let ordering = sort_cmp(a.as_ref(), b.as_ref());
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        rows.into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(row_id, _)| row_id.clone())
            .collect()
    }

    pub fn get_row(&self, table_id: &str, row_id: &str) -> Row {
        self.tables
            .get(table_id)
            .and_then(|table| table.get(row_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_row(&self, table_id: &str, row_id: &str) -> bool {
        self.tables
            .get(table_id)
            .is_some_and(|table| table.contains_key(row_id))
    }

    pub fn get_cell_ids(&self, table_id: &str, row_id: &str) -> Vec<Id> {
        self.tables
            .get(table_id)
            .and_then(|table| table.get(row_id))
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_cell(&self, table_id: &str, row_id: &str, cell_id: &str) -> Option<Value> {
        self.tables
            .get(table_id)
            .and_then(|table| table.get(row_id))
            .and_then(|row| row.get(cell_id))
            .cloned()
    }

    pub fn has_cell(&self, table_id: &str, row_id: &str, cell_id: &str) -> bool {
        self.get_cell(table_id, row_id, cell_id).is_some()
    }

    pub fn get_values(&self) -> Values {
        self.values.clone()
    }

    pub fn has_values(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn get_value_ids(&self) -> Vec<Id> {
        self.values.keys().cloned().collect()
    }

    pub fn get_value(&self, value_id: &str) -> Option<Value> {
        self.values.get(value_id).cloned()
    }

    pub fn has_value(&self, value_id: &str) -> bool {
        self.values.contains_key(value_id)
    }

    pub fn get_tables_schema(&self) -> Option<&TablesSchema> {
        self.tables_schema.as_ref()
    }

    pub fn get_values_schema(&self) -> Option<&ValuesSchema> {
        self.values_schema.as_ref()
    }

    // Iteration, in insertion order

    pub fn for_each_table(&self, mut callback: impl FnMut(&str, &Table)) {
        for (table_id, table) in &self.tables {
            callback(table_id, table);
        }
    }

    /// Each cell id used in the table, with the number of rows using it
    pub fn for_each_table_cell(&self, table_id: &str, mut callback: impl FnMut(&str, usize)) {
        if let Some(counts) = self.table_cell_counts.get(table_id) {
            for (cell_id, count) in counts {
                callback(cell_id, *count);
            }
        }
    }

    pub fn for_each_row(&self, table_id: &str, mut callback: impl FnMut(&str, &Row)) {
        if let Some(table) = self.tables.get(table_id) {
            for (row_id, row) in table {
                callback(row_id, row);
            }
        }
    }

    pub fn for_each_cell(&self, table_id: &str, row_id: &str, mut callback: impl FnMut(&str, &Value)) {
        if let Some(row) = self.tables.get(table_id).and_then(|table| table.get(row_id)) {
            for (cell_id, cell) in row {
                callback(cell_id, cell);
            }
        }
    }

    pub fn for_each_value(&self, mut callback: impl FnMut(&str, &Value)) {
        for (value_id, value) in &self.values {
            callback(value_id, value);
        }
    }

    // Listener registration

    fn add_listener<F>(&mut self, kind: ListenerKind, path: Vec<PathKey>, mutator: bool, listener: F) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        let callback: Listener = Arc::new(listener);
        self.registry.add(kind, path, mutator, callback, None)
    }

    pub fn add_has_tables_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasTables, vec![], mutator, listener)
    }

    pub fn add_tables_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Tables, vec![], mutator, listener)
    }

    pub fn add_table_ids_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::TableIds, vec![], mutator, listener)
    }

    pub fn add_has_table_listener<F>(&mut self, table_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasTable, path([table_id]), mutator, listener)
    }

    pub fn add_table_listener<F>(&mut self, table_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Table, path([table_id]), mutator, listener)
    }

    pub fn add_table_cell_ids_listener<F>(&mut self, table_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::TableCellIds, path([table_id]), mutator, listener)
    }

    pub fn add_has_table_cell_listener<F>(
        &mut self,
        table_id: Option<&str>,
        cell_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasTableCell, path([table_id, cell_id]), mutator, listener)
    }

    pub fn add_row_count_listener<F>(&mut self, table_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::RowCount, path([table_id]), mutator, listener)
    }

    pub fn add_row_ids_listener<F>(&mut self, table_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::RowIds, path([table_id]), mutator, listener)
    }

    /// Called whenever the sorted, paginated row ids of a table change. The
    /// current result is computed at registration and compared on every
    /// relevant change.
    #[allow(clippy::too_many_arguments)]
    pub fn add_sorted_row_ids_listener<F>(
        &mut self,
        table_id: &str,
        cell_id: Option<&str>,
        descending: bool,
        offset: usize,
        limit: Option<usize>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        let query = SortedRowIdsQuery {
            table_id: table_id.to_string(),
            cell_id: cell_id.map(str::to_string),
            descending,
            offset,
            limit,
            last: self.get_sorted_row_ids(table_id, cell_id, descending, offset, limit),
        };
        let callback: Listener = Arc::new(listener);
        self.registry.add(
            ListenerKind::SortedRowIds,
            path([Some(table_id), cell_id]),
            mutator,
            callback,
            Some(query),
        )
    }

    pub fn add_has_row_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasRow, path([table_id, row_id]), mutator, listener)
    }

    pub fn add_row_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Row, path([table_id, row_id]), mutator, listener)
    }

    pub fn add_cell_ids_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::CellIds, path([table_id, row_id]), mutator, listener)
    }

    pub fn add_has_cell_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        cell_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasCell, path([table_id, row_id, cell_id]), mutator, listener)
    }

    pub fn add_cell_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        cell_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Cell, path([table_id, row_id, cell_id]), mutator, listener)
    }

    pub fn add_has_values_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasValues, vec![], mutator, listener)
    }

    pub fn add_values_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Values, vec![], mutator, listener)
    }

    pub fn add_value_ids_listener<F>(&mut self, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::ValueIds, vec![], mutator, listener)
    }

    pub fn add_has_value_listener<F>(&mut self, value_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::HasValue, path([value_id]), mutator, listener)
    }

    pub fn add_value_listener<F>(&mut self, value_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::Value, path([value_id]), mutator, listener)
    }

    pub fn add_invalid_cell_listener<F>(
        &mut self,
        table_id: Option<&str>,
        row_id: Option<&str>,
        cell_id: Option<&str>,
        listener: F,
        mutator: bool,
    ) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::InvalidCell, path([table_id, row_id, cell_id]), mutator, listener)
    }

    pub fn add_invalid_value_listener<F>(&mut self, value_id: Option<&str>, listener: F, mutator: bool) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::InvalidValue, path([value_id]), mutator, listener)
    }

    /// Called when the outermost transaction starts; may write
    pub fn add_start_transaction_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::StartTransaction, vec![], false, listener)
    }

    /// Called after the mutator pass (and any rollback), before display
    /// listeners; may write
    pub fn add_will_finish_transaction_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::WillFinishTransaction, vec![], false, listener)
    }

    /// Called after display listeners; transaction changes are still
    /// readable but writes are ignored
    pub fn add_did_finish_transaction_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync + 'static,
    {
        self.add_listener(ListenerKind::DidFinishTransaction, vec![], false, listener)
    }

    /// Remove a listener; unknown ids are ignored
    pub fn del_listener(&mut self, id: ListenerId) -> &mut Self {
        self.registry.remove(id);
        self
    }

    pub fn get_listener_stats(&self) -> ListenerStats {
        self.registry.stats()
    }
}

fn path<const N: usize>(ids: [Option<&str>; N]) -> Vec<PathKey> {
    ids.into_iter().map(|id| id.map(str::to_string)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pets() -> Store {
        let mut store = Store::new();
        store
            .set_row("pets", "fido", Row::from([("species".into(), "dog".into()), ("legs".into(), 4.into())]))
            .set_row("pets", "felix", Row::from([("species".into(), "cat".into()), ("legs".into(), 4.into())]))
            .set_row("pets", "polly", Row::from([("species".into(), "parrot".into())]));
        store
    }

    #[test]
    fn test_getters() {
        let store = pets();
        assert!(store.has_tables());
        assert_eq!(store.get_table_ids(), vec!["pets"]);
        assert_eq!(store.get_row_ids("pets"), vec!["fido", "felix", "polly"]);
        assert_eq!(store.get_row_count("pets"), 3);
        assert_eq!(store.get_table_cell_ids("pets"), vec!["species", "legs"]);
        assert!(store.has_table_cell("pets", "legs"));
        assert_eq!(store.get_cell("pets", "polly", "species"), Some(Value::from("parrot")));
        assert_eq!(store.get_cell("pets", "polly", "legs"), None);
        assert_eq!(store.get_cell_ids("pets", "fido"), vec!["species", "legs"]);
        assert!(store.get_row("pets", "nobody").is_empty());
        assert!(store.get_table("nothing").is_empty());
    }

    #[test]
    fn test_sorted_row_ids() {
        let store = pets();
        assert_eq!(
            store.get_sorted_row_ids("pets", Some("species"), false, 0, None),
            vec!["felix", "fido", "polly"]
        );
        assert_eq!(
            store.get_sorted_row_ids("pets", Some("legs"), false, 0, None),
            vec!["polly", "fido", "felix"]
        );
        assert_eq!(
            store.get_sorted_row_ids("pets", Some("legs"), true, 0, None),
            vec!["fido", "felix", "polly"]
        );
        assert_eq!(store.get_sorted_row_ids("pets", None, false, 1, Some(1)), vec!["fido"]);
        assert!(store.get_sorted_row_ids("nothing", None, false, 0, None).is_empty());
    }

    #[test]
    fn test_iteration_order() {
        let store = pets();
        let mut rows = Vec::new();
        store.for_each_row("pets", |row_id, row| rows.push((row_id.to_string(), row.len())));
        assert_eq!(rows, vec![("fido".to_string(), 2), ("felix".to_string(), 2), ("polly".to_string(), 1)]);

        let mut cells = Vec::new();
        store.for_each_table_cell("pets", |cell_id, count| cells.push((cell_id.to_string(), count)));
        assert_eq!(cells, vec![("species".to_string(), 3), ("legs".to_string(), 2)]);
    }

    #[test]
    fn test_store_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Store>();
    }
}
