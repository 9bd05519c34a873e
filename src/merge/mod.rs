use std::sync::Arc;

use crate::errors::{RefineError, Result};
use crate::store::{ResponseStore, Session};

/// Combine every category preview, in stepper order, into a new canonical
/// output. On success the output stage unlocks; on failure the record and
/// its stale stage are left untouched.
pub async fn merge(store: &ResponseStore) -> Result<Arc<Session>> {
    let slot = store.begin()?;
    let snap = store.snapshot();
    let record = snap
        .record()
        .ok_or_else(|| RefineError::MissingData("no active record to merge".into()))?;
    if record.categories.is_empty() {
        return Err(RefineError::MissingData("record has no categories to merge".into()));
    }
    if snap.has_unconfirmed() {
        // The server only knows the last applied previews.
        tracing::warn!(record = %record.id, "merging with unapplied checkbox changes");
    }

    let previews = snap.previews();
    store.merge(&slot, &record.id, &previews).await.map_err(|e| {
        tracing::warn!(record = %record.id, error = %e, "merge failed");
        e
    })
}
