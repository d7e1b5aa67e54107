//! Mergeable stores
//!
//! A [`MergeableStore`] owns a [`Store`] and a stamp tree that shadows its
//! data. Every local write is stamped with a fresh HLC through the store's
//! mutation hooks, so two replicas can exchange content (or just the
//! subtrees whose hashes differ) and converge by last-writer-wins.

mod content;
mod diff;
mod merge;

pub use content::{
    CellHashes, CellStamp, ContentHashes, MergeableChanges, MergeableContent, RowDiff, RowHashes, RowStamp,
    TableDiff, TableHashes, TableStamp, TablesStamp, ValueHashes, ValueStamp, ValuesStamp,
};

use crate::config::MergeableConfig;
use crate::store::{MutationHooks, Store};
use crate::value::Value;
use content::validate_content;
use merge::StampState;
use parking_lot::RwLock;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use synapsed_crdt::{HlcClock, Mergeable, SystemTimeSource, TimeSource};
use tracing::{debug, warn};

/// Stamps local writes as the store applies them
struct StampHooks {
    state: Arc<RwLock<StampState>>,
}

impl MutationHooks for StampHooks {
    fn transaction_started(&mut self) {
        self.state.write().clear_touched();
    }

    fn cell_changed(&mut self, table_id: &str, row_id: &str, cell_id: &str, new_cell: Option<&Value>) {
        self.state.write().cell_changed(table_id, row_id, cell_id, new_cell);
    }

    fn value_changed(&mut self, value_id: &str, new_value: Option<&Value>) {
        self.state.write().value_changed(value_id, new_value);
    }
}

/// A store whose data can be merged with other replicas.
///
/// Dereferences to [`Store`] for reads, writes and listeners.
pub struct MergeableStore {
    store: Store,
    state: Arc<RwLock<StampState>>,
}

impl MergeableStore {
    /// Create a replica. `unique_id` seeds the client part of its HLCs; a
    /// random one is used when absent.
    pub fn new(unique_id: Option<&str>) -> Self {
        Self::with_time_source(unique_id, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(unique_id: Option<&str>, time_source: Arc<dyn TimeSource>) -> Self {
        Self::with_config_and_time_source(
            MergeableConfig {
                client_id: unique_id.map(str::to_string),
                ..MergeableConfig::default()
            },
            time_source,
        )
    }

    pub fn with_config(config: MergeableConfig) -> Self {
        Self::with_config_and_time_source(config, Arc::new(SystemTimeSource))
    }

    pub fn with_config_and_time_source(config: MergeableConfig, time_source: Arc<dyn TimeSource>) -> Self {
        let clock = HlcClock::with_time_source(config.client_id.as_deref(), time_source);
        debug!(client_part = clock.client_part(), "creating mergeable store");
        let state = Arc::new(RwLock::new(StampState::new(clock)));
        let mut store = Store::with_config(config.store);
        store.set_mutation_hooks(Box::new(StampHooks { state: state.clone() }));
        Self { store, state }
    }

    /// A cloneable read-only view of the stamp tree
    pub fn handle(&self) -> MergeableHandle {
        MergeableHandle {
            state: self.state.clone(),
        }
    }

    /// The encoded client part every HLC from this replica ends with
    pub fn client_part(&self) -> String {
        self.state.read().clock.client_part().to_string()
    }

    pub fn get_mergeable_content(&self) -> MergeableContent {
        self.state.read().content()
    }

    /// Replace everything with previously exported content. Content that
    /// is missing hashes is rejected and the store is left unchanged.
    pub fn try_set_mergeable_content(&mut self, content: MergeableContent) -> synapsed_crdt::Result<&mut Self> {
        validate_content(&content)?;
        let MergeableContent(tables, values) = content;
        self.merge_stamps(&tables, &values, true);
        Ok(self)
    }

    /// Like [`MergeableStore::try_set_mergeable_content`], logging and
    /// ignoring invalid content
    pub fn set_mergeable_content(&mut self, content: MergeableContent) -> &mut Self {
        if let Err(error) = self.try_set_mergeable_content(content) {
            warn!(%error, "ignoring mergeable content");
        }
        self
    }

    /// Merge stamped changes (or content) from another replica
    pub fn apply_mergeable_changes(&mut self, changes: MergeableChanges) -> &mut Self {
        self.merge_stamps(&changes.tables, &changes.values, false);
        self
    }

    /// Exchange full content with another replica so both converge
    pub fn merge(&mut self, other: &mut MergeableStore) -> &mut Self {
        Mergeable::merge(self, other);
        self
    }

    pub fn get_transaction_mergeable_changes(&self) -> MergeableChanges {
        self.state.read().transaction_changes()
    }

    pub fn get_mergeable_content_hashes(&self) -> ContentHashes {
        self.state.read().content_hashes()
    }

    pub fn get_mergeable_table_hashes(&self) -> TableHashes {
        self.state.read().table_hashes()
    }

    pub fn get_mergeable_table_diff(&self, other_table_hashes: &TableHashes) -> TableDiff {
        self.state.read().table_diff(other_table_hashes)
    }

    pub fn get_mergeable_row_hashes(&self, other_table_hashes: &TableHashes) -> RowHashes {
        self.state.read().row_hashes(other_table_hashes)
    }

    pub fn get_mergeable_row_diff(&self, other_row_hashes: &RowHashes) -> RowDiff {
        self.state.read().row_diff(other_row_hashes)
    }

    pub fn get_mergeable_cell_hashes(&self, other_row_hashes: &RowHashes) -> CellHashes {
        self.state.read().cell_hashes(other_row_hashes)
    }

    pub fn get_mergeable_cell_diff(&self, other_cell_hashes: &CellHashes) -> TablesStamp {
        self.state.read().cell_diff(other_cell_hashes)
    }

    pub fn get_mergeable_value_hashes(&self) -> ValueHashes {
        self.state.read().value_hashes()
    }

    pub fn get_mergeable_value_diff(&self, other_value_hashes: &ValueHashes) -> ValuesStamp {
        self.state.read().value_diff(other_value_hashes)
    }

    /// Merge stamps into the tree and apply what was adopted to the store.
    /// Stamping is paused while the adopted writes are applied, so they keep
    /// the HLCs they arrived with; writes made by mutator listeners once the
    /// transaction finishes are stamped as usual.
    fn merge_stamps(&mut self, tables: &TablesStamp, values: &ValuesStamp, is_content: bool) {
        let state = &self.state;
        self.store.transaction(|store| {
            let was_listening = std::mem::replace(&mut state.write().listening, false);
            if is_content {
                state.write().reset();
                store.del_tables().del_values();
            }
            let changes = state.write().merge(tables, values, is_content);
            store.apply_changes(changes);
            state.write().listening = was_listening;
        });
    }
}

impl Deref for MergeableStore {
    type Target = Store;

    fn deref(&self) -> &Store {
        &self.store
    }
}

impl DerefMut for MergeableStore {
    fn deref_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

impl std::fmt::Debug for MergeableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeableStore")
            .field("store", &self.store)
            .field("client_part", &self.client_part())
            .finish()
    }
}

impl Mergeable for MergeableStore {
    type Content = MergeableContent;
    type Changes = MergeableChanges;

    fn get_mergeable_content(&self) -> MergeableContent {
        MergeableStore::get_mergeable_content(self)
    }

    fn set_mergeable_content(&mut self, content: MergeableContent) -> synapsed_crdt::Result<()> {
        self.try_set_mergeable_content(content).map(|_| ())
    }

    fn apply_mergeable_changes(&mut self, changes: MergeableChanges) {
        MergeableStore::apply_mergeable_changes(self, changes);
    }

    fn get_transaction_mergeable_changes(&self) -> MergeableChanges {
        MergeableStore::get_transaction_mergeable_changes(self)
    }
}

/// Read-only, thread-safe view of a mergeable store's stamps.
///
/// Handles stay valid for the life of the store they came from and observe
/// its latest state.
#[derive(Clone)]
pub struct MergeableHandle {
    state: Arc<RwLock<StampState>>,
}

impl MergeableHandle {
    pub fn get_mergeable_content(&self) -> MergeableContent {
        self.state.read().content()
    }

    pub fn get_transaction_mergeable_changes(&self) -> MergeableChanges {
        self.state.read().transaction_changes()
    }

    pub fn get_mergeable_content_hashes(&self) -> ContentHashes {
        self.state.read().content_hashes()
    }

    pub fn get_mergeable_table_hashes(&self) -> TableHashes {
        self.state.read().table_hashes()
    }

    pub fn get_mergeable_table_diff(&self, other_table_hashes: &TableHashes) -> TableDiff {
        self.state.read().table_diff(other_table_hashes)
    }

    pub fn get_mergeable_row_hashes(&self, other_table_hashes: &TableHashes) -> RowHashes {
        self.state.read().row_hashes(other_table_hashes)
    }

    pub fn get_mergeable_row_diff(&self, other_row_hashes: &RowHashes) -> RowDiff {
        self.state.read().row_diff(other_row_hashes)
    }

    pub fn get_mergeable_cell_hashes(&self, other_row_hashes: &RowHashes) -> CellHashes {
        self.state.read().cell_hashes(other_row_hashes)
    }

    pub fn get_mergeable_cell_diff(&self, other_cell_hashes: &CellHashes) -> TablesStamp {
        self.state.read().cell_diff(other_cell_hashes)
    }

    pub fn get_mergeable_value_hashes(&self) -> ValueHashes {
        self.state.read().value_hashes()
    }

    pub fn get_mergeable_value_diff(&self, other_value_hashes: &ValueHashes) -> ValuesStamp {
        self.state.read().value_diff(other_value_hashes)
    }
}

impl std::fmt::Debug for MergeableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MergeableHandle")
            .field("client_part", &state.clock.client_part())
            .field("hashes", &state.content_hashes())
            .finish()
    }
}
