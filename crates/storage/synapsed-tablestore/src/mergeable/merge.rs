//! The stamp tree and the last-writer-wins merge
//!
//! The stamp tree mirrors the store's tables and values. Every node carries
//! the latest HLC beneath it and a content hash; leaves also carry the
//! value, or `None` once deleted. Nodes are never removed, so a deletion is
//! just a newer stamp with no value and merges need no tombstone handling.

use super::content::{
    CellStamp, MergeableChanges, MergeableContent, RowStamp, TableStamp, TablesStamp, ValueStamp,
    ValuesStamp,
};
use crate::changes::{Changes, RowChanges, TableChanges};
use crate::value::{js_json, Id, Value};
use indexmap::{IndexMap, IndexSet};
use synapsed_crdt::{
    merkle::{child_hash_delta, leaf_hash},
    stamp::supersedes,
    Hlc, HlcClock, Stamp, StampNode,
};
use tracing::{debug, trace};

pub(crate) type LeafNode = StampNode<Option<Value>>;
pub(crate) type LeavesNode = StampNode<IndexMap<Id, LeafNode>>;
pub(crate) type TableNode = StampNode<IndexMap<Id, LeavesNode>>;
pub(crate) type TablesNode = StampNode<IndexMap<Id, TableNode>>;

/// Shared state of a mergeable store: its clock, stamp tree and the ids
/// touched by the current transaction
#[derive(Debug)]
pub(crate) struct StampState {
    pub(crate) clock: HlcClock,
    pub(crate) tables: TablesNode,
    pub(crate) values: LeavesNode,
    /// Local writes are stamped only while listening
    pub(crate) listening: bool,
    touched_cells: IndexMap<Id, IndexMap<Id, IndexSet<Id>>>,
    touched_values: IndexSet<Id>,
}

impl StampState {
    pub(crate) fn new(clock: HlcClock) -> Self {
        Self {
            clock,
            tables: TablesNode::default(),
            values: LeavesNode::default(),
            listening: true,
            touched_cells: IndexMap::new(),
            touched_values: IndexSet::new(),
        }
    }

    /// Forget all stamps (the clock keeps its state)
    pub(crate) fn reset(&mut self) {
        self.tables = TablesNode::default();
        self.values = LeavesNode::default();
    }

    pub(crate) fn clear_touched(&mut self) {
        self.touched_cells.clear();
        self.touched_values.clear();
    }

    /// Record a local cell write and, while listening, stamp it
    pub(crate) fn cell_changed(&mut self, table_id: &str, row_id: &str, cell_id: &str, new_cell: Option<&Value>) {
        self.touched_cells
            .entry(table_id.to_string())
            .or_default()
            .entry(row_id.to_string())
            .or_default()
            .insert(cell_id.to_string());
        if !self.listening {
            return;
        }
        let hlc = self.clock.next_hlc();
        trace!(table_id, row_id, cell_id, %hlc, "stamping cell");
        let cell = CellStamp::new(new_cell.cloned(), hlc.clone());
        let row = RowStamp::new(IndexMap::from([(cell_id.to_string(), cell)]), hlc.clone());
        let table = TableStamp::new(IndexMap::from([(row_id.to_string(), row)]), hlc.clone());
        let tables = TablesStamp::new(IndexMap::from([(table_id.to_string(), table)]), hlc);
        self.merge(&tables, &ValuesStamp::default(), false);
    }

    /// Record a local value write and, while listening, stamp it
    pub(crate) fn value_changed(&mut self, value_id: &str, new_value: Option<&Value>) {
        self.touched_values.insert(value_id.to_string());
        if !self.listening {
            return;
        }
        let hlc = self.clock.next_hlc();
        trace!(value_id, %hlc, "stamping value");
        let value = ValueStamp::new(new_value.cloned(), hlc.clone());
        let values = ValuesStamp::new(IndexMap::from([(value_id.to_string(), value)]), hlc);
        self.merge(&TablesStamp::default(), &values, false);
    }

    /// Merge stamped content or changes into the tree, returning the leaves
    /// that were adopted as plain changes for the store.
    ///
    /// With `is_content` the incoming hashes are trusted and copied rather
    /// than recomputed, which is only sound when loading into an empty tree.
    pub(crate) fn merge(&mut self, tables: &TablesStamp, values: &ValuesStamp, is_content: bool) -> Changes {
        let mut changes = Changes::default();
        let trust_tables = is_content && tables.hash.is_some();
        let mut tables_latest = tables.hlc.clone();

        for (table_id, table_stamp) in &tables.value {
            let table_node = self.tables.value.entry(table_id.clone()).or_default();
            let old_table_hash = table_node.hash;
            let trust_table = is_content && table_stamp.hash.is_some();
            let mut table_latest = table_stamp.hlc.clone();
            let mut table_changes = TableChanges::new();

            for (row_id, row_stamp) in &table_stamp.value {
                let row_node = table_node.value.entry(row_id.clone()).or_default();
                let old_row_hash = row_node.hash;
                let mut row_changes = RowChanges::new();
                let row_latest = merge_leaves(row_node, row_stamp, &mut row_changes, is_content);
                let new_row_hash = row_node.hash;
                if !trust_table {
                    table_node.hash ^= child_hash_delta(row_id, old_row_hash, new_row_hash);
                }
                table_latest = table_latest.max(row_latest);
                if !row_changes.is_empty() {
                    table_changes.insert(row_id.clone(), Some(row_changes));
                }
            }

            if let (true, Some(hash)) = (trust_table, table_stamp.hash) {
                table_node.hash = hash;
            }
            table_node.touch(&table_latest);
            let new_table_hash = table_node.hash;
            if !trust_tables {
                self.tables.hash ^= child_hash_delta(table_id, old_table_hash, new_table_hash);
            }
            tables_latest = tables_latest.max(table_latest);
            if !table_changes.is_empty() {
                changes.tables.insert(table_id.clone(), Some(table_changes));
            }
        }
        if let (true, Some(hash)) = (trust_tables, tables.hash) {
            self.tables.hash = hash;
        }
        self.tables.touch(&tables_latest);

        let values_latest = merge_leaves(&mut self.values, values, &mut changes.values, is_content);

        let latest = tables_latest.max(values_latest);
        self.clock.seen_hlc(Some(&latest));
        if !changes.is_empty() {
            debug!(
                tables = changes.tables.len(),
                values = changes.values.len(),
                is_content,
                "merged stamps"
            );
        }
        changes
    }

    /// The whole tree as content, with hashes
    pub(crate) fn content(&self) -> MergeableContent {
        MergeableContent(tables_stamp(&self.tables, true), leaves_stamp(&self.values, true))
    }

    /// Stamps of the cells and values touched by the current (or most
    /// recent) transaction, without hashes
    pub(crate) fn transaction_changes(&self) -> MergeableChanges {
        let mut tables = TablesStamp::new(IndexMap::new(), self.tables.hlc.clone());
        for (table_id, rows) in &self.touched_cells {
            let Some(table_node) = self.tables.value.get(table_id) else {
                continue;
            };
            let mut table = TableStamp::new(IndexMap::new(), table_node.hlc.clone());
            for (row_id, cell_ids) in rows {
                let Some(row_node) = table_node.value.get(row_id) else {
                    continue;
                };
                let cells = cell_ids
                    .iter()
                    .filter_map(|cell_id| {
                        let cell = row_node.value.get(cell_id)?;
                        Some((cell_id.clone(), cell.to_stamp(false)))
                    })
                    .collect();
                table.value.insert(row_id.clone(), RowStamp::new(cells, row_node.hlc.clone()));
            }
            tables.value.insert(table_id.clone(), table);
        }
        let values = self
            .touched_values
            .iter()
            .filter_map(|value_id| {
                let value = self.values.value.get(value_id)?;
                Some((value_id.clone(), value.to_stamp(false)))
            })
            .collect();
        MergeableChanges::new(tables, ValuesStamp::new(values, self.values.hlc.clone()))
    }
}

/// LWW-merge incoming leaves into a row (or the values), updating its hash
/// and HLC. Returns the latest HLC among the incoming container and the
/// adopted leaves.
fn merge_leaves(
    node: &mut LeavesNode,
    incoming: &Stamp<IndexMap<Id, Stamp<Option<Value>>>>,
    changes: &mut IndexMap<Id, Option<Value>>,
    is_content: bool,
) -> Hlc {
    let trust = is_content && incoming.hash.is_some();
    let mut latest = incoming.hlc.clone();
    for (id, leaf) in &incoming.value {
        let stored = node.value.entry(id.clone()).or_default();
        if !supersedes(&leaf.hlc, &stored.hlc) {
            continue;
        }
        let old_hash = stored.hash;
        let new_hash = match leaf.hash {
            Some(hash) if is_content => hash,
            _ => leaf_hash(&js_json(leaf.value.as_ref()), leaf.hlc.as_str()),
        };
        *stored = LeafNode {
            value: leaf.value.clone(),
            hlc: leaf.hlc.clone(),
            hash: new_hash,
        };
        if !trust {
            node.hash ^= child_hash_delta(id, old_hash, new_hash);
        }
        changes.insert(id.clone(), leaf.value.clone());
        if leaf.hlc > latest {
            latest = leaf.hlc.clone();
        }
    }
    if let (true, Some(hash)) = (trust, incoming.hash) {
        node.hash = hash;
    }
    node.touch(&latest);
    latest
}

pub(crate) fn leaves_stamp(node: &LeavesNode, with_hash: bool) -> Stamp<IndexMap<Id, Stamp<Option<Value>>>> {
    Stamp {
        value: node
            .value
            .iter()
            .map(|(id, leaf)| (id.clone(), leaf.to_stamp(with_hash)))
            .collect(),
        hlc: node.hlc.clone(),
        hash: with_hash.then_some(node.hash),
    }
}

pub(crate) fn table_stamp(node: &TableNode, with_hash: bool) -> TableStamp {
    Stamp {
        value: node
            .value
            .iter()
            .map(|(row_id, row)| (row_id.clone(), leaves_stamp(row, with_hash)))
            .collect(),
        hlc: node.hlc.clone(),
        hash: with_hash.then_some(node.hash),
    }
}

fn tables_stamp(node: &TablesNode, with_hash: bool) -> TablesStamp {
    Stamp {
        value: node
            .value
            .iter()
            .map(|(table_id, table)| (table_id.clone(), table_stamp(table, with_hash)))
            .collect(),
        hlc: node.hlc.clone(),
        hash: with_hash.then_some(node.hash),
    }
}
