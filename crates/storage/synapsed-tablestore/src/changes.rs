//! Change sets and transaction logs
//!
//! `Changes` is the net effect of a transaction in wire form
//! `[changedTables, changedValues, 1]`; `None` (JSON `null`) at any level
//! means the table, row, cell or value was deleted.

use crate::value::{Id, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type RowChanges = IndexMap<Id, Option<Value>>;
pub type TableChanges = IndexMap<Id, Option<RowChanges>>;
pub type TablesChanges = IndexMap<Id, Option<TableChanges>>;
pub type ValuesChanges = IndexMap<Id, Option<Value>>;

type ChangesWire = (TablesChanges, ValuesChanges, u8);

/// Net changes to tables and values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChangesWire", into = "ChangesWire")]
pub struct Changes {
    pub tables: TablesChanges,
    pub values: ValuesChanges,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.values.is_empty()
    }
}

impl From<ChangesWire> for Changes {
    fn from((tables, values, _): ChangesWire) -> Self {
        Self { tables, values }
    }
}

impl From<Changes> for ChangesWire {
    fn from(changes: Changes) -> Self {
        (changes.tables, changes.values, 1)
    }
}

/// Whether an id was added to or removed from a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdChange {
    Added,
    Removed,
}

impl IdChange {
    pub fn opposite(self) -> Self {
        match self {
            IdChange::Added => IdChange::Removed,
            IdChange::Removed => IdChange::Added,
        }
    }
}

/// Ids added to or removed from a collection during a transaction
pub type ChangedIds = IndexMap<Id, IdChange>;

/// Record an id change, cancelling an opposite change of the same id
pub(crate) fn record_id_change(changed: &mut ChangedIds, id: &str, change: IdChange) {
    if changed.get(id) == Some(&change.opposite()) {
        changed.shift_remove(id);
    } else {
        changed.insert(id.to_string(), change);
    }
}

/// Old and new state of a cell or value during a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub changed: bool,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// `(old, new)` per changed cell
pub type ChangedCells = IndexMap<Id, IndexMap<Id, IndexMap<Id, (Option<Value>, Option<Value>)>>>;
/// `(old, new)` per changed value
pub type ChangedValues = IndexMap<Id, (Option<Value>, Option<Value>)>;
/// Rejected cells, keyed by table, row and cell id where known
pub type InvalidCells = IndexMap<Option<Id>, IndexMap<Option<Id>, IndexMap<Option<Id>, Vec<Option<Value>>>>>;
/// Rejected values, keyed by value id where known
pub type InvalidValues = IndexMap<Option<Id>, Vec<Option<Value>>>;

/// Everything a transaction did, as seen by a rollback predicate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionLog {
    pub changed_cells: ChangedCells,
    pub invalid_cells: InvalidCells,
    pub changed_values: ChangedValues,
    pub invalid_values: InvalidValues,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changes_wire_shape() {
        let changes = Changes {
            tables: IndexMap::from([
                (
                    "t1".to_string(),
                    Some(IndexMap::from([(
                        "r1".to_string(),
                        Some(IndexMap::from([
                            ("c1".to_string(), Some(Value::from(1))),
                            ("c2".to_string(), None),
                        ])),
                    )])),
                ),
                ("t2".to_string(), None),
            ]),
            values: IndexMap::from([("v1".to_string(), Some(Value::from("x")))]),
        };
        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(
            json,
            json!([{"t1": {"r1": {"c1": 1, "c2": null}}, "t2": null}, {"v1": "x"}, 1])
        );
        let back: Changes = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
    }

    #[test]
    fn test_id_changes_cancel() {
        let mut changed = ChangedIds::new();
        record_id_change(&mut changed, "a", IdChange::Added);
        record_id_change(&mut changed, "b", IdChange::Removed);
        record_id_change(&mut changed, "a", IdChange::Removed);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["b"], IdChange::Removed);
    }
}
