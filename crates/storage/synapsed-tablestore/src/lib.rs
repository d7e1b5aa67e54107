//! # Synapsed Tablestore
//!
//! A reactive in-memory store of tables and keyed values, with an optional
//! mergeable layer for replicas that converge without coordination.
//!
//! - **Store**: tables of rows of cells plus keyed values, optional
//!   schemas with defaults, pooled row ids and nested transactions
//! - **Listeners**: 25 kinds of change listener with wildcard paths, run
//!   once per transaction in a mutator pass and then a display pass
//! - **Mergeable store**: every write stamped with a hybrid logical clock;
//!   replicas merge by last-writer-wins per cell and value
//! - **Diff sync**: hash comparison table by table, row by row and cell by
//!   cell, so only what differs is exchanged
//!
//! ## Example
//!
//! ```rust
//! use synapsed_tablestore::{DiffSync, MergeableStore, Value};
//!
//! let mut laptop = MergeableStore::new(Some("laptop"));
//! let mut phone = MergeableStore::new(Some("phone"));
//!
//! laptop.set_cell("pets", "fido", "species", "dog");
//! phone.set_cell("pets", "fido", "legs", 4);
//!
//! let mut sync = DiffSync::new();
//! sync.synchronize(&mut laptop, &mut phone);
//!
//! assert_eq!(laptop.get_tables(), phone.get_tables());
//! assert_eq!(phone.get_cell("pets", "fido", "species"), Some(Value::from("dog")));
//! ```

pub mod changes;
pub mod config;
pub mod error;
pub mod listeners;
pub mod mergeable;
pub mod schema;
pub mod store;
pub mod sync;
pub mod value;

mod path_index;
mod pool;

// Re-exports for convenience
pub use changes::{ChangedIds, Changes, IdChange, TransactionLog, ValueChange};
pub use config::{MergeableConfig, StoreConfig};
pub use error::{Result, StoreError};
pub use listeners::{Listener, ListenerEvent, ListenerId, ListenerKind, ListenerStats};
pub use mergeable::{MergeableChanges, MergeableContent, MergeableHandle, MergeableStore};
pub use schema::{CellSchema, TablesSchema, ValueSchema, ValuesSchema};
pub use store::{MutationHooks, Row, Store, Table, Tables, Values};
pub use sync::{DiffSync, SyncStatistics};
pub use value::{Cell, Id, Value, ValueType};

pub use synapsed_crdt::{Hlc, ManualTimeSource, Mergeable, SystemTimeSource, TimeSource};
