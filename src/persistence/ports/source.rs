//! Read side the journal snapshots from.

use super::DocumentStoreResult;
use crate::persistence::domain::EntityRef;
use serde_json::Value;

/// Produces the current document body for a runtime entity.
pub trait SnapshotSource: Send + Sync {
    /// Returns the entity's current body, or `None` when it no longer exists
    /// and its document should be deleted.
    ///
    /// # Errors
    ///
    /// Returns [`super::DocumentStoreError::Snapshot`] when the owning
    /// component cannot be read.
    fn snapshot(&self, entity: EntityRef) -> DocumentStoreResult<Option<Value>>;
}
