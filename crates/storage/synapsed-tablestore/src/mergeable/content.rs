//! Wire types of the mergeable layer
//!
//! Content is `[tablesStamp, valuesStamp]`, every stamp carrying its hash;
//! changes use the same nesting without hashes plus a trailing `1`. The
//! hash and diff types carry just enough for two replicas to locate the
//! subtrees where they differ.

use crate::value::{Id, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use synapsed_crdt::{CrdtError, Hash, Stamp};

pub type CellStamp = Stamp<Option<Value>>;
pub type ValueStamp = Stamp<Option<Value>>;
pub type RowStamp = Stamp<IndexMap<Id, CellStamp>>;
pub type TableStamp = Stamp<IndexMap<Id, RowStamp>>;
pub type TablesStamp = Stamp<IndexMap<Id, TableStamp>>;
pub type ValuesStamp = Stamp<IndexMap<Id, ValueStamp>>;

/// Full stamped state of a replica
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeableContent(pub TablesStamp, pub ValuesStamp);

type ChangesWire = (TablesStamp, ValuesStamp, u8);

/// Stamped changes, as produced by a transaction or a diff
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChangesWire", into = "ChangesWire")]
pub struct MergeableChanges {
    pub tables: TablesStamp,
    pub values: ValuesStamp,
}

impl MergeableChanges {
    pub fn new(tables: TablesStamp, values: ValuesStamp) -> Self {
        Self { tables, values }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.value.is_empty() && self.values.value.is_empty()
    }
}

impl From<ChangesWire> for MergeableChanges {
    fn from((tables, values, _): ChangesWire) -> Self {
        Self { tables, values }
    }
}

impl From<MergeableChanges> for ChangesWire {
    fn from(changes: MergeableChanges) -> Self {
        (changes.tables, changes.values, 1)
    }
}

impl From<MergeableContent> for MergeableChanges {
    fn from(MergeableContent(tables, values): MergeableContent) -> Self {
        Self { tables, values }
    }
}

/// `[tablesHash, valuesHash]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashes(pub Hash, pub Hash);

pub type TableHashes = IndexMap<Id, Hash>;
pub type RowHashes = IndexMap<Id, IndexMap<Id, Hash>>;
pub type CellHashes = IndexMap<Id, IndexMap<Id, IndexMap<Id, Hash>>>;
pub type ValueHashes = IndexMap<Id, Hash>;

/// Tables the other side lacks, and hashes of tables both have but differ on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDiff(pub TablesStamp, pub TableHashes);

/// Rows the other side lacks, and hashes of rows both have but differ on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowDiff(pub TablesStamp, pub RowHashes);

/// Check that content is fully hashed, as exported content always is
pub(crate) fn validate_content(content: &MergeableContent) -> Result<(), CrdtError> {
    let MergeableContent(tables, values) = content;
    require_hash(tables.hash, "tables")?;
    for (table_id, table) in &tables.value {
        require_hash(table.hash, table_id)?;
        for (row_id, row) in &table.value {
            require_hash(row.hash, row_id)?;
            for (cell_id, cell) in &row.value {
                require_hash(cell.hash, cell_id)?;
            }
        }
    }
    require_hash(values.hash, "values")?;
    for (value_id, value) in &values.value {
        require_hash(value.hash, value_id)?;
    }
    Ok(())
}

fn require_hash(hash: Option<Hash>, id: &str) -> Result<(), CrdtError> {
    match hash {
        Some(_) => Ok(()),
        None => Err(CrdtError::InvalidContent(format!("missing hash for {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use synapsed_crdt::Hlc;

    #[test]
    fn test_changes_wire_shape() {
        let hlc = Hlc::parse("0000000000000000").unwrap();
        let changes = MergeableChanges::new(
            Stamp::new(
                IndexMap::from([(
                    "t1".to_string(),
                    Stamp::new(
                        IndexMap::from([(
                            "r1".to_string(),
                            Stamp::new(
                                IndexMap::from([("c1".to_string(), Stamp::new(Some(Value::from(1)), hlc.clone()))]),
                                hlc.clone(),
                            ),
                        )]),
                        hlc.clone(),
                    ),
                )]),
                hlc.clone(),
            ),
            Stamp::new(IndexMap::from([("v1".to_string(), Stamp::new(None, hlc.clone()))]), hlc),
        );
        let h = "0000000000000000";
        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(
            json,
            json!([
                [{"t1": [{"r1": [{"c1": [1, h]}, h]}, h]}, h],
                [{"v1": [null, h]}, h],
                1
            ])
        );
        let back: MergeableChanges = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
    }

    #[test]
    fn test_content_requires_hashes() {
        let content: MergeableContent = serde_json::from_value(json!([[{}, "", 0], [{}, "", 0]])).unwrap();
        assert!(validate_content(&content).is_ok());

        let unhashed: MergeableContent =
            serde_json::from_value(json!([[{"t1": [{}, ""]}, "", 0], [{}, "", 0]])).unwrap();
        assert!(matches!(validate_content(&unhashed), Err(CrdtError::InvalidContent(_))));
    }
}
