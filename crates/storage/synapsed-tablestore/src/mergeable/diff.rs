//! Hash and diff getters for incremental synchronization
//!
//! Two replicas compare hashes level by level (content, tables, rows,
//! cells) and only descend into subtrees whose hashes differ. Subtrees one
//! side lacks entirely are sent whole.

use super::content::{
    CellHashes, ContentHashes, RowDiff, RowHashes, TableDiff, TableHashes, TableStamp, TablesStamp, ValueHashes,
    ValuesStamp,
};
use super::merge::{leaves_stamp, table_stamp, StampState};
use indexmap::IndexMap;
use synapsed_crdt::{Hlc, Stamp};

impl StampState {
    pub(crate) fn content_hashes(&self) -> ContentHashes {
        ContentHashes(self.tables.hash, self.values.hash)
    }

    pub(crate) fn table_hashes(&self) -> TableHashes {
        self.tables
            .value
            .iter()
            .map(|(table_id, table)| (table_id.clone(), table.hash))
            .collect()
    }

    pub(crate) fn table_diff(&self, other_table_hashes: &TableHashes) -> TableDiff {
        let mut new_tables = TablesStamp::new(IndexMap::new(), self.tables.hlc.clone());
        let mut different_hashes = TableHashes::new();
        for (table_id, table) in &self.tables.value {
            match other_table_hashes.get(table_id) {
                Some(other_hash) if *other_hash != table.hash => {
                    different_hashes.insert(table_id.clone(), table.hash);
                }
                Some(_) => {}
                None => {
                    new_tables.value.insert(table_id.clone(), table_stamp(table, false));
                }
            }
        }
        TableDiff(new_tables, different_hashes)
    }

    pub(crate) fn row_hashes(&self, other_table_hashes: &TableHashes) -> RowHashes {
        let mut row_hashes = RowHashes::new();
        for (table_id, table) in &self.tables.value {
            if other_table_hashes.get(table_id).is_some_and(|hash| *hash != table.hash) {
                row_hashes.insert(
                    table_id.clone(),
                    table.value.iter().map(|(row_id, row)| (row_id.clone(), row.hash)).collect(),
                );
            }
        }
        row_hashes
    }

    pub(crate) fn row_diff(&self, other_row_hashes: &RowHashes) -> RowDiff {
        let mut new_rows = TablesStamp::new(IndexMap::new(), self.tables.hlc.clone());
        let mut different_hashes = RowHashes::new();
        for (table_id, other_rows) in other_row_hashes {
            let Some(table) = self.tables.value.get(table_id) else {
                continue;
            };
            for (row_id, row) in &table.value {
                match other_rows.get(row_id) {
                    Some(other_hash) if *other_hash != row.hash => {
                        different_hashes
                            .entry(table_id.clone())
                            .or_default()
                            .insert(row_id.clone(), row.hash);
                    }
                    Some(_) => {}
                    None => {
                        new_rows
                            .value
                            .entry(table_id.clone())
                            .or_insert_with(|| TableStamp::new(IndexMap::new(), Hlc::empty()))
                            .value
                            .insert(row_id.clone(), leaves_stamp(row, false));
                    }
                }
            }
        }
        RowDiff(new_rows, different_hashes)
    }

    pub(crate) fn cell_hashes(&self, other_row_hashes: &RowHashes) -> CellHashes {
        let mut cell_hashes = CellHashes::new();
        for (table_id, other_rows) in other_row_hashes {
            let Some(table) = self.tables.value.get(table_id) else {
                continue;
            };
            for (row_id, other_hash) in other_rows {
                let Some(row) = table.value.get(row_id) else {
                    continue;
                };
                if row.hash != *other_hash {
                    cell_hashes.entry(table_id.clone()).or_default().insert(
                        row_id.clone(),
                        row.value.iter().map(|(cell_id, cell)| (cell_id.clone(), cell.hash)).collect(),
                    );
                }
            }
        }
        cell_hashes
    }

    pub(crate) fn cell_diff(&self, other_cell_hashes: &CellHashes) -> TablesStamp {
        let mut tables = TablesStamp::new(IndexMap::new(), self.tables.hlc.clone());
        for (table_id, other_rows) in other_cell_hashes {
            let Some(table) = self.tables.value.get(table_id) else {
                continue;
            };
            for (row_id, other_cells) in other_rows {
                let Some(row) = table.value.get(row_id) else {
                    continue;
                };
                for (cell_id, cell) in &row.value {
                    if other_cells.get(cell_id) == Some(&cell.hash) {
                        continue;
                    }
                    tables
                        .value
                        .entry(table_id.clone())
                        .or_insert_with(|| TableStamp::new(IndexMap::new(), table.hlc.clone()))
                        .value
                        .entry(row_id.clone())
                        .or_insert_with(|| Stamp::new(IndexMap::new(), row.hlc.clone()))
                        .value
                        .insert(cell_id.clone(), cell.to_stamp(false));
                }
            }
        }
        tables
    }

    pub(crate) fn value_hashes(&self) -> ValueHashes {
        self.values
            .value
            .iter()
            .map(|(value_id, value)| (value_id.clone(), value.hash))
            .collect()
    }

    pub(crate) fn value_diff(&self, other_value_hashes: &ValueHashes) -> ValuesStamp {
        let values = self
            .values
            .value
            .iter()
            .filter(|(value_id, value)| other_value_hashes.get(*value_id) != Some(&value.hash))
            .map(|(value_id, value)| (value_id.clone(), value.to_stamp(false)))
            .collect();
        ValuesStamp::new(values, self.values.hlc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::Arc;
    use synapsed_crdt::{HlcClock, ManualTimeSource};

    fn state(client: &str) -> StampState {
        let time = Arc::new(ManualTimeSource::new(1_704_067_200_000));
        StampState::new(HlcClock::with_time_source(Some(client), time))
    }

    #[test]
    fn test_table_diff_splits_new_and_different() {
        let mut local = state("a");
        local.cell_changed("same", "r1", "c1", Some(&Value::from(1)));
        local.cell_changed("changed", "r1", "c1", Some(&Value::from(1)));
        local.cell_changed("new", "r1", "c1", Some(&Value::from(1)));

        let mut other_hashes = local.table_hashes();
        other_hashes.shift_remove("new");
        *other_hashes.get_mut("changed").unwrap() ^= 1;

        let TableDiff(new_tables, different) = local.table_diff(&other_hashes);
        assert_eq!(new_tables.value.keys().collect::<Vec<_>>(), vec!["new"]);
        assert!(new_tables.value["new"].hash.is_none());
        assert_eq!(different.keys().collect::<Vec<_>>(), vec!["changed"]);
    }

    #[test]
    fn test_row_diff_puts_new_rows_under_unstamped_tables() {
        let mut local = state("a");
        local.cell_changed("t1", "r1", "c1", Some(&Value::from(1)));
        local.cell_changed("t1", "r2", "c1", Some(&Value::from(2)));

        let other = RowHashes::from([("t1".to_string(), IndexMap::from([("r1".to_string(), 0)]))]);
        let RowDiff(new_rows, different) = local.row_diff(&other);
        assert!(new_rows.value["t1"].hlc.is_empty());
        assert!(new_rows.value["t1"].value.contains_key("r2"));
        assert!(different["t1"].contains_key("r1"));
    }

    #[test]
    fn test_cell_diff_only_sends_mismatched_cells() {
        let mut local = state("a");
        local.cell_changed("t1", "r1", "c1", Some(&Value::from(1)));
        local.cell_changed("t1", "r1", "c2", Some(&Value::from(2)));
        let c1_hash = local.tables.value["t1"].value["r1"].value["c1"].hash;

        let other = CellHashes::from([(
            "t1".to_string(),
            IndexMap::from([("r1".to_string(), IndexMap::from([("c1".to_string(), c1_hash)]))]),
        )]);
        let diff = local.cell_diff(&other);
        let cells = &diff.value["t1"].value["r1"].value;
        assert_eq!(cells.keys().collect::<Vec<_>>(), vec!["c2"]);
        assert_eq!(diff.value["t1"].hlc, local.tables.value["t1"].hlc);
    }

    #[test]
    fn test_value_diff() {
        let mut local = state("a");
        local.value_changed("v1", Some(&Value::from(1)));
        local.value_changed("v2", Some(&Value::from(2)));
        let mut other = local.value_hashes();
        other.shift_remove("v2");
        let diff = local.value_diff(&other);
        assert_eq!(diff.value.keys().collect::<Vec<_>>(), vec!["v2"]);
        assert_eq!(local.value_diff(&local.value_hashes()).value.len(), 0);
    }
}
