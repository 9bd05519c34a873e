use crate::errors::{RefineError, Result};
use crate::store::{ResponseStore, Toggle, Toggled};
use crate::wire::Category;

/// Flip one checkbox locally. The preview of that category is stale until
/// the next `apply`; nothing is sent to the backend here.
pub fn toggle(store: &ResponseStore, step: usize, pattern: usize, toggle: Toggle) -> Result<Toggled> {
    let (_, outcome) = store.update(|s| s.with_toggle(step, pattern, toggle))?;
    if outcome == Toggled::Ignored {
        tracing::debug!(step, pattern, "ignoring indeterminate checkbox state");
    }
    Ok(outcome)
}

/// Send the current checkbox state of `categories[step]` in one call and
/// replace that category with the server's version.
///
/// The category is addressed by the id it has when the call starts. On
/// failure the last confirmed category and the user's checkboxes stay as
/// they were, so the same call can simply be repeated.
pub async fn apply(store: &ResponseStore, step: usize) -> Result<Category> {
    let slot = store.begin()?;
    let snap = store.snapshot();
    if snap.record().is_none() {
        return Err(RefineError::MissingData("no active record to apply patterns to".into()));
    }
    let category = snap
        .category(step)
        .ok_or_else(|| RefineError::MissingData(format!("category {step} is missing")))?;
    let selections = snap.selections(step).unwrap_or_default();

    match store.apply_category(&slot, &category.id, &selections).await {
        Ok(updated) => Ok(updated),
        Err(e) => {
            tracing::warn!(step, category = %category.id, error = %e, "apply failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{Call, FakeBackend};
    use crate::store::fixtures::{category, record};
    use crate::store::{Session, Stage};
    use crate::wire::PatternSelection;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn loaded_store(fake: Arc<FakeBackend>) -> ResponseStore {
        let store = ResponseStore::new(fake);
        store.update(|_| Ok((Session::created(record()), ()))).unwrap();
        store
    }

    #[tokio::test]
    async fn two_toggles_one_call() {
        let fake = Arc::new(FakeBackend::default());
        let mut server = category(2);
        server.patterns[0].applied = true;
        server.patterns[1].applied = false;
        server.preview = "fresh preview 2".into();
        *fake.apply_reply.lock() = Some(server);
        let store = loaded_store(fake.clone());

        toggle(&store, 2, 0, Toggle::On).unwrap();
        toggle(&store, 2, 1, Toggle::Off).unwrap();
        let updated = apply(&store, 2).await.unwrap();

        assert_eq!(
            fake.calls(),
            vec![Call::Apply(
                "c2".into(),
                vec![
                    PatternSelection { pattern_id: "p2a".into(), applied: true },
                    PatternSelection { pattern_id: "p2b".into(), applied: false },
                ]
            )]
        );
        let snap = store.snapshot();
        assert_eq!(snap.category(2).unwrap(), &updated);
        assert_eq!(snap.preview(2), Some("fresh preview 2"));
        assert_eq!(snap.stage(), Stage::Stale);
        assert_eq!(snap.output(), None);
    }

    #[tokio::test]
    async fn out_of_range_step_never_calls_backend() {
        let fake = Arc::new(FakeBackend::default());
        let store = loaded_store(fake.clone());
        let err = apply(&store, 6).await.unwrap_err();
        assert!(matches!(err, RefineError::MissingData(_)));
        assert!(fake.calls().is_empty());
        assert!(!store.is_busy());
    }

    #[tokio::test]
    async fn apply_off_current_step_is_allowed() {
        let fake = Arc::new(FakeBackend::default());
        *fake.apply_reply.lock() = Some(category(5));
        let store = loaded_store(fake.clone());
        assert_eq!(store.snapshot().step(), 0);
        apply(&store, 5).await.unwrap();
        assert!(matches!(&fake.calls()[0], Call::Apply(id, _) if id == "c5"));
    }

    #[tokio::test]
    async fn no_record_is_missing_data() {
        let fake = Arc::new(FakeBackend::default());
        let store = ResponseStore::new(fake.clone());
        assert!(matches!(apply(&store, 0).await, Err(RefineError::MissingData(_))));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_toggles_and_confirmed_category() {
        let fake = Arc::new(FakeBackend::default());
        *fake.fail.lock() = true;
        let store = loaded_store(fake.clone());
        toggle(&store, 1, 0, Toggle::On).unwrap();
        let before = store.snapshot();

        let err = apply(&store, 1).await.unwrap_err();
        assert!(matches!(err, RefineError::Upstream(_)));
        let after = store.snapshot();
        assert_eq!(*after, *before);
        assert!(after.category(1).unwrap().patterns[0].applied);
        assert_eq!(after.category(1).unwrap().preview, "preview 1");
        assert_eq!(after.stage(), Stage::Created);
    }

    #[tokio::test]
    async fn indeterminate_is_ignored() {
        let store = loaded_store(Arc::new(FakeBackend::default()));
        let before = store.snapshot();
        assert_eq!(toggle(&store, 0, 0, Toggle::Indeterminate).unwrap(), Toggled::Ignored);
        assert_eq!(*store.snapshot(), *before);
    }
}
