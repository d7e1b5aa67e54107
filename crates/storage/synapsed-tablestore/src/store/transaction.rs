//! Transactions and listener dispatch
//!
//! Nested transactions coalesce into the outermost one. When it finishes,
//! listeners run in two passes over the accumulated changes: mutator
//! listeners first (they may write, and their writes join the same
//! transaction), then display listeners (whose writes are ignored).

use super::{Store, TransactionState};
use crate::changes::{Changes, IdChange, TableChanges, TransactionLog, ValueChange};
use crate::listeners::{ListenerEvent, ListenerKind};
use crate::path_index::PathSegment;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

impl Store {
    /// Run `actions` in a transaction and return their result
    pub fn transaction<R>(&mut self, actions: impl FnOnce(&mut Self) -> R) -> R {
        if self.transactions < 0 {
            return actions(self);
        }
        self.start_transaction();
        let result = actions(self);
        self.finish_transaction_with(None);
        result
    }

    /// Run `actions` in a transaction; if `do_rollback` returns true for
    /// the transaction's log, every change is reverted before display
    /// listeners run
    pub fn transaction_with_rollback<R>(
        &mut self,
        actions: impl FnOnce(&mut Self) -> R,
        mut do_rollback: impl FnMut(&TransactionLog) -> bool,
    ) -> R {
        if self.transactions < 0 {
            return actions(self);
        }
        self.start_transaction();
        let result = actions(self);
        self.finish_transaction_with(Some(&mut do_rollback));
        result
    }

    pub fn start_transaction(&mut self) -> &mut Self {
        if self.transactions < 0 {
            return self;
        }
        self.transactions += 1;
        if self.transactions == 1 {
            debug!("transaction started");
            self.log.had_tables = self.has_tables();
            self.log.had_values = self.has_values();
            if let Some(hooks) = self.hooks.as_mut() {
                hooks.transaction_started();
            }
            self.call_listeners(ListenerKind::StartTransaction, false, &[], &ListenerEvent::StartTransaction);
        }
        self
    }

    pub fn finish_transaction(&mut self) -> &mut Self {
        self.finish_transaction_with(None);
        self
    }

    /// Finish the current transaction, rolling it back if `do_rollback`
    /// returns true
    pub fn finish_transaction_with_rollback(
        &mut self,
        mut do_rollback: impl FnMut(&TransactionLog) -> bool,
    ) -> &mut Self {
        self.finish_transaction_with(Some(&mut do_rollback));
        self
    }

    fn finish_transaction_with(&mut self, do_rollback: Option<&mut dyn FnMut(&TransactionLog) -> bool>) {
        if self.transactions <= 0 {
            return;
        }
        self.transactions -= 1;
        if self.transactions > 0 {
            return;
        }

        self.transactions = 1;
        self.call_changes_listeners(true);

        if let Some(do_rollback) = do_rollback {
            if do_rollback(&self.get_transaction_log()) {
                debug!("rolling back transaction");
                self.rollback();
            }
        }

        self.call_listeners(
            ListenerKind::WillFinishTransaction,
            false,
            &[],
            &ListenerEvent::WillFinishTransaction,
        );

        self.transactions = -1;
        self.call_changes_listeners(false);

        if let Some(hooks) = self.hooks.as_mut() {
            hooks.transaction_will_finish();
        }
        self.call_listeners(
            ListenerKind::DidFinishTransaction,
            false,
            &[],
            &ListenerEvent::DidFinishTransaction,
        );
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.transaction_finished();
        }

        self.transactions = 0;
        self.log = TransactionState::default();
        debug!("transaction finished");
    }

    fn rollback(&mut self) {
        let cells: Vec<_> = self
            .log
            .changed_cells
            .iter()
            .flat_map(|(table_id, rows)| {
                rows.iter().flat_map(move |(row_id, cells)| {
                    cells.iter().filter(|(_, (old, new))| old != new).map(move |(cell_id, (old, _))| {
                        (table_id.clone(), row_id.clone(), cell_id.clone(), old.clone())
                    })
                })
            })
            .collect();
        let values: Vec<_> = self
            .log
            .changed_values
            .iter()
            .filter(|(_, (old, new))| old != new)
            .map(|(value_id, (old, _))| (value_id.clone(), old.clone()))
            .collect();
        for (table_id, row_id, cell_id, old) in cells {
            self.set_or_del_cell(&table_id, &row_id, &cell_id, old);
        }
        for (value_id, old) in values {
            self.set_or_del_value(&value_id, old);
        }
        self.log.changed_cells.clear();
        self.log.changed_values.clear();
    }

    /// Run `actions` as a transaction unless display listeners are running
    pub(super) fn fluent(&mut self, actions: impl FnOnce(&mut Self)) -> &mut Self {
        if self.transactions < 0 {
            warn!("ignoring write from a display listener");
            return self;
        }
        self.transaction(actions);
        self
    }

    // Introspection

    /// Net changes of the current transaction
    pub fn get_transaction_changes(&self) -> Changes {
        let mut changes = Changes::default();
        for (table_id, rows) in &self.log.changed_cells {
            let Some(table) = self.tables.get(table_id) else {
                changes.tables.insert(table_id.clone(), None);
                continue;
            };
            let mut table_changes = TableChanges::new();
            for (row_id, cells) in rows {
                if !table.contains_key(row_id) {
                    table_changes.insert(row_id.clone(), None);
                    continue;
                }
                let row_changes: IndexMap<_, _> = cells
                    .iter()
                    .filter(|(_, (old, new))| old != new)
                    .map(|(cell_id, (_, new))| (cell_id.clone(), new.clone()))
                    .collect();
                if !row_changes.is_empty() {
                    table_changes.insert(row_id.clone(), Some(row_changes));
                }
            }
            if !table_changes.is_empty() {
                changes.tables.insert(table_id.clone(), Some(table_changes));
            }
        }
        for (value_id, (old, new)) in &self.log.changed_values {
            if old != new {
                changes.values.insert(value_id.clone(), new.clone());
            }
        }
        changes
    }

    /// Everything the current transaction changed or rejected
    pub fn get_transaction_log(&self) -> TransactionLog {
        let mut changed_cells = self.log.changed_cells.clone();
        for rows in changed_cells.values_mut() {
            for cells in rows.values_mut() {
                cells.retain(|_, (old, new)| old != new);
            }
            rows.retain(|_, cells| !cells.is_empty());
        }
        changed_cells.retain(|_, rows| !rows.is_empty());
        let mut changed_values = self.log.changed_values.clone();
        changed_values.retain(|_, (old, new)| old != new);
        TransactionLog {
            changed_cells,
            invalid_cells: self.log.invalid_cells.clone(),
            changed_values,
            invalid_values: self.log.invalid_values.clone(),
        }
    }

    pub fn get_cell_change(&self, table_id: &str, row_id: &str, cell_id: &str) -> ValueChange {
        match self
            .log
            .changed_cells
            .get(table_id)
            .and_then(|rows| rows.get(row_id))
            .and_then(|cells| cells.get(cell_id))
        {
            Some((old, new)) => ValueChange {
                changed: old != new,
                old: old.clone(),
                new: new.clone(),
            },
            None => {
                let cell = self.get_cell(table_id, row_id, cell_id);
                ValueChange {
                    changed: false,
                    old: cell.clone(),
                    new: cell,
                }
            }
        }
    }

    pub fn get_value_change(&self, value_id: &str) -> ValueChange {
        match self.log.changed_values.get(value_id) {
            Some((old, new)) => ValueChange {
                changed: old != new,
                old: old.clone(),
                new: new.clone(),
            },
            None => {
                let value = self.get_value(value_id);
                ValueChange {
                    changed: false,
                    old: value.clone(),
                    new: value,
                }
            }
        }
    }

    // Dispatch

    pub(super) fn call_listeners(
        &mut self,
        kind: ListenerKind,
        mutator: bool,
        path: &[PathSegment<'_>],
        event: &ListenerEvent<'_>,
    ) {
        for (id, callback) in self.registry.matching_listeners(kind, mutator, path) {
            if self.registry.is_live(id, &callback) {
                trace!(?kind, listener = %id, mutator, "calling listener");
                callback(self, event);
            }
        }
    }

    fn call_changes_listeners(&mut self, mutator: bool) {
        self.call_invalid_listeners(mutator);

        if !self.log.changed_table_ids.is_empty()
            || !self.log.changed_table_cell_ids.is_empty()
            || !self.log.changed_row_ids.is_empty()
            || !self.log.changed_cell_ids.is_empty()
            || !self.log.changed_cells.is_empty()
        {
            self.call_tables_listeners(mutator);
        }
        if !self.log.changed_value_ids.is_empty() || !self.log.changed_values.is_empty() {
            self.call_values_listeners(mutator);
        }
    }

    fn call_invalid_listeners(&mut self, mutator: bool) {
        if !self.log.invalid_cells.is_empty() && self.registry.has_any(ListenerKind::InvalidCell, mutator) {
            let invalid_cells = self.log.invalid_cells.clone();
            for (table_id, rows) in &invalid_cells {
                for (row_id, cells) in rows {
                    for (cell_id, invalid) in cells {
                        let (table_id, row_id, cell_id) =
                            (table_id.as_deref(), row_id.as_deref(), cell_id.as_deref());
                        self.call_listeners(
                            ListenerKind::InvalidCell,
                            mutator,
                            &[table_id.into(), row_id.into(), cell_id.into()],
                            &ListenerEvent::InvalidCell {
                                table_id,
                                row_id,
                                cell_id,
                                invalid_cells: invalid,
                            },
                        );
                    }
                }
            }
        }
        if !self.log.invalid_values.is_empty() && self.registry.has_any(ListenerKind::InvalidValue, mutator) {
            let invalid_values = self.log.invalid_values.clone();
            for (value_id, invalid) in &invalid_values {
                let value_id = value_id.as_deref();
                self.call_listeners(
                    ListenerKind::InvalidValue,
                    mutator,
                    &[value_id.into()],
                    &ListenerEvent::InvalidValue {
                        value_id,
                        invalid_values: invalid,
                    },
                );
            }
        }
    }

    fn call_tables_listeners(&mut self, mutator: bool) {
        let has_tables = self.has_tables();
        if has_tables != self.log.had_tables {
            self.call_listeners(
                ListenerKind::HasTables,
                mutator,
                &[],
                &ListenerEvent::HasTables { has: has_tables },
            );
        }

        let table_ids = self.log.changed_table_ids.clone();
        if !table_ids.is_empty() {
            self.call_listeners(ListenerKind::TableIds, mutator, &[], &ListenerEvent::TableIds { changes: &table_ids });
            for (table_id, change) in &table_ids {
                self.call_listeners(
                    ListenerKind::HasTable,
                    mutator,
                    &[table_id.as_str().into()],
                    &ListenerEvent::HasTable {
                        table_id,
                        has: *change == IdChange::Added,
                    },
                );
            }
        }

        let table_cell_ids = self.log.changed_table_cell_ids.clone();
        for (table_id, cell_ids) in table_cell_ids.iter().filter(|(_, ids)| !ids.is_empty()) {
            self.call_listeners(
                ListenerKind::TableCellIds,
                mutator,
                &[table_id.as_str().into()],
                &ListenerEvent::TableCellIds {
                    table_id,
                    changes: cell_ids,
                },
            );
            for (cell_id, change) in cell_ids {
                self.call_listeners(
                    ListenerKind::HasTableCell,
                    mutator,
                    &[table_id.as_str().into(), cell_id.as_str().into()],
                    &ListenerEvent::HasTableCell {
                        table_id,
                        cell_id,
                        has: *change == IdChange::Added,
                    },
                );
            }
        }

        let row_counts = self.log.changed_row_count.clone();
        for (table_id, delta) in &row_counts {
            if *delta != 0 {
                let count = self.get_row_count(table_id);
                self.call_listeners(
                    ListenerKind::RowCount,
                    mutator,
                    &[table_id.as_str().into()],
                    &ListenerEvent::RowCount { table_id, count },
                );
            }
        }

        let row_ids = self.log.changed_row_ids.clone();
        let mut resorted_tables = Vec::new();
        for (table_id, ids) in row_ids.iter().filter(|(_, ids)| !ids.is_empty()) {
            self.call_listeners(
                ListenerKind::RowIds,
                mutator,
                &[table_id.as_str().into()],
                &ListenerEvent::RowIds { table_id, changes: ids },
            );
            self.call_sorted_row_ids_listeners(mutator, table_id, PathSegment::All);
            resorted_tables.push(table_id.as_str());
            for (row_id, change) in ids {
                self.call_listeners(
                    ListenerKind::HasRow,
                    mutator,
                    &[table_id.as_str().into(), row_id.as_str().into()],
                    &ListenerEvent::HasRow {
                        table_id,
                        row_id,
                        has: *change == IdChange::Added,
                    },
                );
            }
        }

        let changed_cells = self.log.changed_cells.clone();
        if self.registry.has_any(ListenerKind::SortedRowIds, mutator) {
            for (table_id, rows) in &changed_cells {
                if resorted_tables.contains(&table_id.as_str()) {
                    continue;
                }
                let mut cell_ids: Vec<&str> = Vec::new();
                for cells in rows.values() {
                    for (cell_id, (old, new)) in cells {
                        if old != new && !cell_ids.contains(&cell_id.as_str()) {
                            cell_ids.push(cell_id);
                        }
                    }
                }
                for cell_id in cell_ids {
                    self.call_sorted_row_ids_listeners(mutator, table_id, PathSegment::Id(cell_id));
                }
            }
        }

        let cell_ids = self.log.changed_cell_ids.clone();
        for (table_id, rows) in &cell_ids {
            for (row_id, ids) in rows.iter().filter(|(_, ids)| !ids.is_empty()) {
                self.call_listeners(
                    ListenerKind::CellIds,
                    mutator,
                    &[table_id.as_str().into(), row_id.as_str().into()],
                    &ListenerEvent::CellIds {
                        table_id,
                        row_id,
                        changes: ids,
                    },
                );
                for (cell_id, change) in ids {
                    self.call_listeners(
                        ListenerKind::HasCell,
                        mutator,
                        &[table_id.as_str().into(), row_id.as_str().into(), cell_id.as_str().into()],
                        &ListenerEvent::HasCell {
                            table_id,
                            row_id,
                            cell_id,
                            has: *change == IdChange::Added,
                        },
                    );
                }
            }
        }

        let mut tables_changed = false;
        for (table_id, rows) in &changed_cells {
            let mut table_changed = false;
            for (row_id, cells) in rows {
                let mut row_changed = false;
                for (cell_id, (old, new)) in cells {
                    if old != new {
                        self.call_listeners(
                            ListenerKind::Cell,
                            mutator,
                            &[table_id.as_str().into(), row_id.as_str().into(), cell_id.as_str().into()],
                            &ListenerEvent::Cell {
                                table_id,
                                row_id,
                                cell_id,
                                new_cell: new.as_ref(),
                                old_cell: old.as_ref(),
                            },
                        );
                        row_changed = true;
                    }
                }
                if row_changed {
                    self.call_listeners(
                        ListenerKind::Row,
                        mutator,
                        &[table_id.as_str().into(), row_id.as_str().into()],
                        &ListenerEvent::Row { table_id, row_id },
                    );
                    table_changed = true;
                }
            }
            if table_changed {
                self.call_listeners(
                    ListenerKind::Table,
                    mutator,
                    &[table_id.as_str().into()],
                    &ListenerEvent::Table { table_id },
                );
                tables_changed = true;
            }
        }
        if tables_changed {
            self.call_listeners(ListenerKind::Tables, mutator, &[], &ListenerEvent::Tables);
        }
    }

    fn call_sorted_row_ids_listeners(&mut self, mutator: bool, table_id: &str, cell: PathSegment<'_>) {
        for (id, callback) in
            self.registry
                .matching_listeners(ListenerKind::SortedRowIds, mutator, &[PathSegment::Id(table_id), cell])
        {
            if !self.registry.is_live(id, &callback) {
                continue;
            }
            let Some(query) = self.registry.sorted_query(id).cloned() else {
                continue;
            };
            let sorted = self.get_sorted_row_ids(
                &query.table_id,
                query.cell_id.as_deref(),
                query.descending,
                query.offset,
                query.limit,
            );
            if sorted == query.last {
                continue;
            }
            self.registry.set_sorted_result(id, sorted.clone());
            trace!(listener = %id, table_id, "calling sorted row ids listener");
            callback(
                self,
                &ListenerEvent::SortedRowIds {
                    table_id: &query.table_id,
                    cell_id: query.cell_id.as_deref(),
                    descending: query.descending,
                    offset: query.offset,
                    limit: query.limit,
                    sorted_row_ids: &sorted,
                },
            );
        }
    }

    fn call_values_listeners(&mut self, mutator: bool) {
        let has_values = self.has_values();
        if has_values != self.log.had_values {
            self.call_listeners(
                ListenerKind::HasValues,
                mutator,
                &[],
                &ListenerEvent::HasValues { has: has_values },
            );
        }

        let value_ids = self.log.changed_value_ids.clone();
        if !value_ids.is_empty() {
            self.call_listeners(ListenerKind::ValueIds, mutator, &[], &ListenerEvent::ValueIds { changes: &value_ids });
            for (value_id, change) in &value_ids {
                self.call_listeners(
                    ListenerKind::HasValue,
                    mutator,
                    &[value_id.as_str().into()],
                    &ListenerEvent::HasValue {
                        value_id,
                        has: *change == IdChange::Added,
                    },
                );
            }
        }

        let changed_values = self.log.changed_values.clone();
        let mut values_changed = false;
        for (value_id, (old, new)) in &changed_values {
            if old != new {
                self.call_listeners(
                    ListenerKind::Value,
                    mutator,
                    &[value_id.as_str().into()],
                    &ListenerEvent::Value {
                        value_id,
                        new_value: new.as_ref(),
                        old_value: old.as_ref(),
                    },
                );
                values_changed = true;
            }
        }
        if values_changed {
            self.call_listeners(ListenerKind::Values, mutator, &[], &ListenerEvent::Values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Row;
    use crate::value::Value;

    #[test]
    fn test_nested_transactions_coalesce() {
        let mut store = Store::new();
        store.transaction(|store| {
            store.set_cell("t", "r", "c", 1);
            store.transaction(|store| {
                store.set_cell("t", "r", "c", 2);
            });
            assert_eq!(store.get_transaction_changes().tables.len(), 1);
        });
        assert!(store.get_transaction_changes().is_empty());
        assert_eq!(store.get_cell("t", "r", "c"), Some(Value::from(2)));
    }

    #[test]
    fn test_net_zero_change_is_not_reported() {
        let mut store = Store::new();
        store.set_cell("t", "r", "c", 1);
        store.transaction(|store| {
            store.set_cell("t", "r", "c", 2).set_cell("t", "r", "c", 1);
            assert!(store.get_transaction_changes().is_empty());
            assert!(!store.get_cell_change("t", "r", "c").changed);
            assert!(store.get_transaction_log().changed_cells.is_empty());
        });
    }

    #[test]
    fn test_rollback_reverts_everything() {
        let mut store = Store::new();
        store.set_cell("t", "r", "a", 1).set_value("v", 1);
        store.transaction_with_rollback(
            |store| {
                store
                    .set_cell("t", "r", "a", 2)
                    .set_cell("t", "r2", "b", 3)
                    .del_value("v", false)
                    .set_value("w", "x");
            },
            |log| log.changed_cells.contains_key("t"),
        );
        assert_eq!(store.get_row_ids("t"), vec!["r"]);
        assert_eq!(store.get_cell("t", "r", "a"), Some(Value::from(1)));
        assert_eq!(store.get_value_ids(), vec!["v"]);
    }

    #[test]
    fn test_explicit_start_and_finish() {
        let mut store = Store::new();
        store.start_transaction().set_cell("t", "r", "c", 1);
        let change = store.get_cell_change("t", "r", "c");
        assert!(change.changed);
        assert_eq!(change.old, None);
        assert_eq!(change.new, Some(Value::from(1)));
        store.finish_transaction_with_rollback(|_| true);
        assert!(!store.has_tables());
        store.finish_transaction();
        assert!(!store.has_tables());
    }

    #[test]
    fn test_transaction_changes_mark_deletions() {
        let mut store = Store::new();
        store.set_row("t1", "r1", Row::from([("a".to_string(), Value::from(1))]));
        store.set_row("t2", "r1", Row::from([("a".to_string(), Value::from(1))]));
        store.set_row("t2", "r2", Row::from([("a".to_string(), Value::from(1))]));
        store.transaction(|store| {
            store.del_table("t1").del_row("t2", "r1").set_value("v", true);
            let changes = serde_json::to_value(store.get_transaction_changes()).unwrap();
            assert_eq!(
                changes,
                serde_json::json!([{"t1": null, "t2": {"r1": null}}, {"v": true}, 1])
            );
        });
    }
}
