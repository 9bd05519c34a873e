use std::sync::Arc;

use crate::errors::{RefineError, Result};
use crate::store::{ResponseStore, Session};

/// Persist the chosen final output. A failed save keeps everything local so
/// the user can simply save again.
pub async fn save(store: &ResponseStore) -> Result<Arc<Session>> {
    let slot = store.begin()?;
    let snap = store.snapshot();
    let record = snap
        .record()
        .ok_or_else(|| RefineError::MissingData("no active record to save".into()))?;
    if !snap.stage().final_pending() {
        return Err(RefineError::Rejected("choose a final output before saving".into()));
    }

    match store.save(&slot, &record.id, &record.output).await {
        Ok(saved) => Ok(saved),
        Err(e) => {
            tracing::warn!(record = %record.id, error = %e, "save failed");
            Err(e)
        }
    }
}
