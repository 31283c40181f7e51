//! Store writes with the single-retry policy shared by the loop and the
//! coordinator.

use specloop_state::{IterationRecord, SpecStore, Specification, StorageError};
use tracing::debug;

/// Append `record`, retrying once. A retry that hits a duplicate means the
/// first write landed, so it counts as success.
pub(crate) async fn save_iteration(
    store: &dyn SpecStore,
    record: &IterationRecord,
) -> Result<(), StorageError> {
    match store.save_iteration(record).await {
        Ok(_) => Ok(()),
        Err(first) => {
            debug!(iter_id = %record.iter_id, error = %first, "iteration write failed, retrying once");
            match store.save_iteration(record).await {
                Ok(_) | Err(StorageError::DuplicateIteration { .. }) => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}

/// Replace the stored spec, retrying once.
pub(crate) async fn put_spec(store: &dyn SpecStore, spec: &Specification) -> Result<(), StorageError> {
    match store.put_spec(&spec.spec_id, spec).await {
        Ok(()) => Ok(()),
        Err(first) => {
            debug!(spec_id = %spec.spec_id, error = %first, "spec write failed, retrying once");
            store.put_spec(&spec.spec_id, spec).await
        }
    }
}
