//! # Synapsed CRDT
//!
//! Clock, hashing and stamp primitives for mergeable replicas.
//!
//! - **HLC**: hybrid logical clock encoded as sortable 16-character strings
//! - **Merkle hashing**: order-independent 32-bit XOR-folded content hashes
//! - **Stamps**: `[value, hlc, hash]` triples with last-writer-wins adoption
//!
//! ## Example
//!
//! ```rust
//! use synapsed_crdt::{HlcClock, stamp::supersedes};
//!
//! let mut replica1 = HlcClock::new(Some("replica-1"));
//! let mut replica2 = HlcClock::new(Some("replica-2"));
//!
//! let first = replica1.next_hlc();
//! replica2.seen_hlc(Some(&first));
//! let second = replica2.next_hlc();
//!
//! // A write made after observing another always wins over it
//! assert!(supersedes(&second, &first));
//! ```

pub mod clock;
pub mod error;
pub mod merkle;
pub mod stamp;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use clock::{decode_hlc, encode_hlc, HlcClock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use error::{CrdtError, Result};
pub use merkle::{add_or_remove_hash, get_hash, keyed_hash};
pub use stamp::{Stamp, StampNode};
pub use traits::Mergeable;
pub use types::{Hash, Hlc, HlcParts, Timestamp};
