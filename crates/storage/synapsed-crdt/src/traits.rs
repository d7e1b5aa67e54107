//! Core traits for mergeable replicas

use crate::Result;
use serde::{de::DeserializeOwned, Serialize};

/// A replica whose state can be exported as stamped content and merged with
/// the content or changes of other replicas
pub trait Mergeable {
    /// Full stamped state, including hashes
    type Content: Clone + Serialize + DeserializeOwned;

    /// Stamped changes without hashes
    type Changes: Clone + Serialize + DeserializeOwned + From<Self::Content>;

    /// Export the full stamped state
    fn get_mergeable_content(&self) -> Self::Content;

    /// Replace the state with previously exported content
    fn set_mergeable_content(&mut self, content: Self::Content) -> Result<()>;

    /// Merge stamped changes using last-writer-wins per leaf
    fn apply_mergeable_changes(&mut self, changes: Self::Changes);

    /// Stamped changes made by the current or most recent transaction
    fn get_transaction_mergeable_changes(&self) -> Self::Changes;

    /// Exchange full content with another replica so both converge
    fn merge(&mut self, other: &mut Self)
    where
        Self: Sized,
    {
        let mine = self.get_mergeable_content();
        let theirs = other.get_mergeable_content();
        other.apply_mergeable_changes(mine.into());
        self.apply_mergeable_changes(theirs.into());
    }
}
