//! Listener kinds, events and the registry that dispatches them
//!
//! Each (kind, mutator) pair owns its own [`PathIndex`]. Registration hands
//! out a pooled [`ListenerId`]; dispatch returns matching ids and the store
//! clones each callback out before invoking it, so callbacks may register,
//! remove or (in the mutator pass) write freely.

use crate::changes::ChangedIds;
use crate::path_index::{PathIndex, PathKey, PathSegment};
use crate::pool::IdPool;
use crate::store::Store;
use crate::value::{Id, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a listener observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ListenerKind {
    HasTables,
    Tables,
    TableIds,
    HasTable,
    Table,
    TableCellIds,
    HasTableCell,
    RowCount,
    RowIds,
    SortedRowIds,
    HasRow,
    Row,
    CellIds,
    HasCell,
    Cell,
    HasValues,
    Values,
    ValueIds,
    HasValue,
    Value,
    InvalidCell,
    InvalidValue,
    StartTransaction,
    WillFinishTransaction,
    DidFinishTransaction,
}

/// Notification passed to a listener callback
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent<'a> {
    HasTables {
        has: bool,
    },
    Tables,
    TableIds {
        changes: &'a ChangedIds,
    },
    HasTable {
        table_id: &'a str,
        has: bool,
    },
    Table {
        table_id: &'a str,
    },
    TableCellIds {
        table_id: &'a str,
        changes: &'a ChangedIds,
    },
    HasTableCell {
        table_id: &'a str,
        cell_id: &'a str,
        has: bool,
    },
    RowCount {
        table_id: &'a str,
        count: usize,
    },
    RowIds {
        table_id: &'a str,
        changes: &'a ChangedIds,
    },
    SortedRowIds {
        table_id: &'a str,
        cell_id: Option<&'a str>,
        descending: bool,
        offset: usize,
        limit: Option<usize>,
        sorted_row_ids: &'a [Id],
    },
    HasRow {
        table_id: &'a str,
        row_id: &'a str,
        has: bool,
    },
    Row {
        table_id: &'a str,
        row_id: &'a str,
    },
    CellIds {
        table_id: &'a str,
        row_id: &'a str,
        changes: &'a ChangedIds,
    },
    HasCell {
        table_id: &'a str,
        row_id: &'a str,
        cell_id: &'a str,
        has: bool,
    },
    Cell {
        table_id: &'a str,
        row_id: &'a str,
        cell_id: &'a str,
        new_cell: Option<&'a Value>,
        old_cell: Option<&'a Value>,
    },
    HasValues {
        has: bool,
    },
    Values,
    ValueIds {
        changes: &'a ChangedIds,
    },
    HasValue {
        value_id: &'a str,
        has: bool,
    },
    Value {
        value_id: &'a str,
        new_value: Option<&'a Value>,
        old_value: Option<&'a Value>,
    },
    InvalidCell {
        table_id: Option<&'a str>,
        row_id: Option<&'a str>,
        cell_id: Option<&'a str>,
        invalid_cells: &'a [Option<Value>],
    },
    InvalidValue {
        value_id: Option<&'a str>,
        invalid_values: &'a [Option<Value>],
    },
    StartTransaction,
    WillFinishTransaction,
    DidFinishTransaction,
}

impl ListenerEvent<'_> {
    pub fn kind(&self) -> ListenerKind {
        match self {
            ListenerEvent::HasTables { .. } => ListenerKind::HasTables,
            ListenerEvent::Tables => ListenerKind::Tables,
            ListenerEvent::TableIds { .. } => ListenerKind::TableIds,
            ListenerEvent::HasTable { .. } => ListenerKind::HasTable,
            ListenerEvent::Table { .. } => ListenerKind::Table,
            ListenerEvent::TableCellIds { .. } => ListenerKind::TableCellIds,
            ListenerEvent::HasTableCell { .. } => ListenerKind::HasTableCell,
            ListenerEvent::RowCount { .. } => ListenerKind::RowCount,
            ListenerEvent::RowIds { .. } => ListenerKind::RowIds,
            ListenerEvent::SortedRowIds { .. } => ListenerKind::SortedRowIds,
            ListenerEvent::HasRow { .. } => ListenerKind::HasRow,
            ListenerEvent::Row { .. } => ListenerKind::Row,
            ListenerEvent::CellIds { .. } => ListenerKind::CellIds,
            ListenerEvent::HasCell { .. } => ListenerKind::HasCell,
            ListenerEvent::Cell { .. } => ListenerKind::Cell,
            ListenerEvent::HasValues { .. } => ListenerKind::HasValues,
            ListenerEvent::Values => ListenerKind::Values,
            ListenerEvent::ValueIds { .. } => ListenerKind::ValueIds,
            ListenerEvent::HasValue { .. } => ListenerKind::HasValue,
            ListenerEvent::Value { .. } => ListenerKind::Value,
            ListenerEvent::InvalidCell { .. } => ListenerKind::InvalidCell,
            ListenerEvent::InvalidValue { .. } => ListenerKind::InvalidValue,
            ListenerEvent::StartTransaction => ListenerKind::StartTransaction,
            ListenerEvent::WillFinishTransaction => ListenerKind::WillFinishTransaction,
            ListenerEvent::DidFinishTransaction => ListenerKind::DidFinishTransaction,
        }
    }
}

/// Listener callback. It receives the store so it can read (and, when
/// registered as a mutator, write) while being notified.
pub type Listener = Arc<dyn Fn(&mut Store, &ListenerEvent<'_>) + Send + Sync>;

/// Number of registered listeners per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub counts: BTreeMap<ListenerKind, usize>,
}

impl ListenerStats {
    pub fn count(&self, kind: ListenerKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Arguments and last result of a sorted-row-ids listener
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SortedRowIdsQuery {
    pub(crate) table_id: Id,
    pub(crate) cell_id: Option<Id>,
    pub(crate) descending: bool,
    pub(crate) offset: usize,
    pub(crate) limit: Option<usize>,
    pub(crate) last: Vec<Id>,
}

struct ListenerEntry {
    kind: ListenerKind,
    mutator: bool,
    path: Vec<PathKey>,
    callback: Listener,
    sorted: Option<SortedRowIdsQuery>,
}

pub(crate) struct ListenerRegistry {
    pool: IdPool,
    entries: HashMap<ListenerId, ListenerEntry>,
    indexes: HashMap<(ListenerKind, bool), PathIndex>,
}

impl ListenerRegistry {
    pub(crate) fn new(pool_size: usize) -> Self {
        Self {
            pool: IdPool::new(pool_size),
            entries: HashMap::new(),
            indexes: HashMap::new(),
        }
    }

    pub(crate) fn add(
        &mut self,
        kind: ListenerKind,
        path: Vec<PathKey>,
        mutator: bool,
        callback: Listener,
        sorted: Option<SortedRowIdsQuery>,
    ) -> ListenerId {
        let id = ListenerId(self.pool.take(true));
        self.indexes
            .entry((kind, mutator))
            .or_default()
            .insert(&path, id);
        self.entries.insert(
            id,
            ListenerEntry {
                kind,
                mutator,
                path,
                callback,
                sorted,
            },
        );
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        let key = (entry.kind, entry.mutator);
        if let Some(index) = self.indexes.get_mut(&key) {
            index.remove(&entry.path, id);
            if index.is_empty() {
                self.indexes.remove(&key);
            }
        }
        self.pool.release(id.0);
        true
    }

    pub(crate) fn has_any(&self, kind: ListenerKind, mutator: bool) -> bool {
        self.indexes.contains_key(&(kind, mutator))
    }

    pub(crate) fn matching(
        &self,
        kind: ListenerKind,
        mutator: bool,
        path: &[PathSegment<'_>],
    ) -> Vec<ListenerId> {
        self.indexes
            .get(&(kind, mutator))
            .map(|index| index.matching(path))
            .unwrap_or_default()
    }

    /// Snapshot of the listeners matching a path, taken before any of them
    /// runs. Ids can be reused while listeners run, so each entry carries
    /// its callback for [`ListenerRegistry::is_live`].
    pub(crate) fn matching_listeners(
        &self,
        kind: ListenerKind,
        mutator: bool,
        path: &[PathSegment<'_>],
    ) -> Vec<(ListenerId, Listener)> {
        self.matching(kind, mutator, path)
            .into_iter()
            .filter_map(|id| self.entries.get(&id).map(|entry| (id, entry.callback.clone())))
            .collect()
    }

    /// Whether `id` still refers to the same registration as `callback`
    pub(crate) fn is_live(&self, id: ListenerId, callback: &Listener) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.callback, callback))
    }

    pub(crate) fn sorted_query(&self, id: ListenerId) -> Option<&SortedRowIdsQuery> {
        self.entries.get(&id).and_then(|entry| entry.sorted.as_ref())
    }

    pub(crate) fn set_sorted_result(&mut self, id: ListenerId, sorted_row_ids: Vec<Id>) {
        if let Some(query) = self.entries.get_mut(&id).and_then(|entry| entry.sorted.as_mut()) {
            query.last = sorted_row_ids;
        }
    }

    pub(crate) fn stats(&self) -> ListenerStats {
        let mut counts = BTreeMap::new();
        for ((kind, _), index) in &self.indexes {
            *counts.entry(*kind).or_insert(0) += index.len();
        }
        ListenerStats { counts }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.entries.len())
            .finish()
    }
}
