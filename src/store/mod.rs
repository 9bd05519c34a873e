//! The single active refinement record and the stage it is in.
//!
//! `Session` is an immutable snapshot; every transition returns a new one.
//! `ResponseStore` owns the current snapshot, talks to the backend and
//! serializes mutating calls behind an `InFlight` guard.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::DynBackend;
use crate::errors::{RefineError, Result};
use crate::prompt::{decorate_category, decorate_record};
use crate::stepper::Stepper;
use crate::wire::{Category, PatternSelection, RefinementRecord};

/// Where the record is in the workflow. One tag instead of separate
/// "edit/output/compare unlocked" flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Empty,
    /// Fresh from create; output is the backend's first rewrite.
    Created,
    /// A category was re-applied since the last merge.
    Stale,
    Merged,
    /// A conversation turn was accepted locally and is waiting to be saved.
    Chosen,
    Saved,
}

impl Stage {
    pub fn output_unlocked(self) -> bool {
        matches!(self, Stage::Created | Stage::Merged | Stage::Chosen | Stage::Saved)
    }

    pub fn needs_merge(self) -> bool {
        self == Stage::Stale
    }

    pub fn final_pending(self) -> bool {
        self == Stage::Chosen
    }
}

/// Requested checkbox state. `Indeterminate` never changes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
    Indeterminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Changed,
    Unchanged,
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    record: Option<RefinementRecord>,
    stage: Stage,
    stepper: Stepper,
    /// Category ids whose checkboxes moved since their preview was computed.
    unconfirmed: BTreeSet<String>,
}

impl Session {
    pub fn record(&self) -> Option<&RefinementRecord> {
        self.record.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn step(&self) -> usize {
        self.stepper.step()
    }

    pub fn category_count(&self) -> usize {
        self.record.as_ref().map(|r| r.categories.len()).unwrap_or(0)
    }

    pub fn category(&self, step: usize) -> Option<&Category> {
        self.record.as_ref().and_then(|r| r.categories.get(step))
    }

    pub fn is_last_step(&self) -> bool {
        self.stepper.is_last(self.category_count())
    }

    pub fn is_unconfirmed(&self, category_id: &str) -> bool {
        self.unconfirmed.contains(category_id)
    }

    pub fn has_unconfirmed(&self) -> bool {
        !self.unconfirmed.is_empty()
    }

    /// Preview for display. `None` while the checkboxes differ from what the
    /// preview was computed for.
    pub fn preview(&self, step: usize) -> Option<&str> {
        let c = self.category(step)?;
        if self.unconfirmed.contains(&c.id) {
            None
        } else {
            Some(c.preview.as_str())
        }
    }

    /// Canonical output, only while the output stage is unlocked.
    pub fn output(&self) -> Option<&str> {
        if !self.stage.output_unlocked() {
            return None;
        }
        self.record.as_ref().map(|r| r.output.as_str())
    }

    /// Every category preview in stepper order.
    pub fn previews(&self) -> Vec<String> {
        self.record
            .as_ref()
            .map(|r| r.categories.iter().map(|c| c.preview.clone()).collect())
            .unwrap_or_default()
    }

    /// `(patternId, applied)` pairs for one category, as the user left them.
    pub fn selections(&self, step: usize) -> Option<Vec<PatternSelection>> {
        self.category(step).map(|c| {
            c.patterns
                .iter()
                .map(|p| PatternSelection { pattern_id: p.id.clone(), applied: p.applied })
                .collect()
        })
    }

    pub fn created(record: RefinementRecord) -> Self {
        Self {
            record: Some(decorate_record(record)),
            stage: Stage::Created,
            stepper: Stepper::default(),
            unconfirmed: BTreeSet::new(),
        }
    }

    /// A record picked from history: every stage is open.
    pub fn loaded(record: RefinementRecord) -> Self {
        Self { stage: Stage::Merged, ..Self::created(record) }
    }

    pub fn with_step(&self, i: usize) -> Result<Self> {
        let stepper = self.stepper.go_to(i, self.category_count())?;
        Ok(Self { stepper, ..self.clone() })
    }

    pub fn with_next(&self) -> Result<Self> {
        let stepper = self.stepper.next(self.category_count())?;
        Ok(Self { stepper, ..self.clone() })
    }

    pub fn with_prev(&self) -> Result<Self> {
        let stepper = self.stepper.prev(self.category_count())?;
        Ok(Self { stepper, ..self.clone() })
    }

    pub fn with_toggle(&self, step: usize, pattern: usize, toggle: Toggle) -> Result<(Self, Toggled)> {
        let wanted = match toggle {
            Toggle::On => true,
            Toggle::Off => false,
            Toggle::Indeterminate => return Ok((self.clone(), Toggled::Ignored)),
        };
        let mut next = self.clone();
        let category = next
            .record
            .as_mut()
            .and_then(|r| r.categories.get_mut(step))
            .ok_or_else(|| RefineError::MissingData(format!("category {step} does not exist")))?;
        let p = category
            .patterns
            .get_mut(pattern)
            .ok_or_else(|| RefineError::MissingData(format!("pattern {pattern} does not exist in category {step}")))?;
        if p.applied == wanted {
            return Ok((next, Toggled::Unchanged));
        }
        p.applied = wanted;
        let id = category.id.clone();
        next.unconfirmed.insert(id);
        Ok((next, Toggled::Changed))
    }

    /// Replace the category with the same id by the server's version.
    pub fn with_applied(&self, category: Category) -> Result<Self> {
        let mut next = self.clone();
        let record = next
            .record
            .as_mut()
            .ok_or_else(|| RefineError::MissingData("no active record".into()))?;
        let slot = record
            .categories
            .iter_mut()
            .find(|c| c.id == category.id)
            .ok_or_else(|| RefineError::MissingData(format!("category {} is not part of this record", category.id)))?;
        next.unconfirmed.remove(&category.id);
        *slot = decorate_category(category);
        next.stage = Stage::Stale;
        Ok(next)
    }

    pub fn with_merged(&self, record: RefinementRecord) -> Result<Self> {
        let current = self
            .record
            .as_ref()
            .ok_or_else(|| RefineError::MissingData("no active record".into()))?;
        let merged = decorate_record(record);
        let mut next = self.clone();
        next.record = Some(RefinementRecord {
            id: current.id.clone(),
            output: merged.output,
            categories: merged.categories,
            ..current.clone()
        });
        next.unconfirmed.clear();
        next.stage = Stage::Merged;
        Ok(next)
    }

    /// Local-only: take a conversation turn as the new baseline.
    pub fn with_final_output(&self, output: &str, input: &str) -> Result<Self> {
        if self.record.is_none() {
            return Err(RefineError::MissingData("no active record".into()));
        }
        if !self.stage.output_unlocked() {
            return Err(RefineError::Rejected("merge the previews before choosing a final output".into()));
        }
        let mut next = self.clone();
        if let Some(r) = next.record.as_mut() {
            r.output = output.to_string();
            r.input = input.to_string();
        }
        next.stage = Stage::Chosen;
        Ok(next)
    }

    pub fn with_saved(&self, saved: RefinementRecord) -> Result<Self> {
        let mut next = self.clone();
        let r = next
            .record
            .as_mut()
            .ok_or_else(|| RefineError::MissingData("no active record".into()))?;
        r.output = saved.output;
        next.stage = Stage::Saved;
        Ok(next)
    }
}

/// Proof that the caller holds the one mutating slot.
pub struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct ResponseStore {
    backend: DynBackend,
    session: Mutex<Arc<Session>>,
    busy: AtomicBool,
}

impl ResponseStore {
    pub fn new(backend: DynBackend) -> Self {
        Self {
            backend,
            session: Mutex::new(Arc::new(Session::default())),
            busy: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &DynBackend {
        &self.backend
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.session.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the mutating slot; `Busy` when another call holds it.
    pub fn begin(&self) -> Result<InFlight<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RefineError::Busy)?;
        Ok(InFlight { flag: &self.busy })
    }

    fn replace(&self, next: Session) -> Arc<Session> {
        let next = Arc::new(next);
        *self.session.lock() = next.clone();
        next
    }

    /// Apply a local transition to the current snapshot.
    pub fn update<T>(&self, f: impl FnOnce(&Session) -> Result<(Session, T)>) -> Result<(Arc<Session>, T)> {
        let mut guard = self.session.lock();
        let (next, out) = f(&guard)?;
        let next = Arc::new(next);
        *guard = next.clone();
        Ok((next, out))
    }

    pub async fn create(&self, _slot: &InFlight<'_>, input: &str) -> Result<Arc<Session>> {
        tracing::info!(chars = input.len(), "creating record");
        let record = self.backend.create_record(input).await?;
        tracing::info!(record = %record.id, categories = record.categories.len(), "record created");
        Ok(self.replace(Session::created(record)))
    }

    pub async fn load(&self, _slot: &InFlight<'_>, record_id: &str) -> Result<Arc<Session>> {
        let record = self.backend.get_record(record_id).await?;
        tracing::info!(record = %record.id, "record loaded from history");
        Ok(self.replace(Session::loaded(record)))
    }

    pub async fn apply_category(
        &self,
        _slot: &InFlight<'_>,
        category_id: &str,
        selections: &[PatternSelection],
    ) -> Result<Category> {
        tracing::info!(category = category_id, patterns = selections.len(), "applying category");
        let category = self.backend.apply_category_patterns(category_id, selections).await?;
        if category.id != category_id {
            return Err(RefineError::Upstream(format!(
                "apply for {category_id} answered with category {}",
                category.id
            )));
        }
        let (_, ()) = self.update(|s| Ok((s.with_applied(category.clone())?, ())))?;
        Ok(decorate_category(category))
    }

    pub async fn merge(&self, _slot: &InFlight<'_>, record_id: &str, previews: &[String]) -> Result<Arc<Session>> {
        tracing::info!(record = record_id, previews = previews.len(), "merging previews");
        let record = self.backend.merge_previews(record_id, previews).await?;
        let (next, ()) = self.update(|s| Ok((s.with_merged(record)?, ())))?;
        Ok(next)
    }

    pub async fn save(&self, _slot: &InFlight<'_>, record_id: &str, output: &str) -> Result<Arc<Session>> {
        tracing::info!(record = record_id, chars = output.len(), "saving final output");
        let saved = self.backend.update_record(record_id, output).await?;
        let (next, ()) = self.update(|s| Ok((s.with_saved(saved)?, ())))?;
        Ok(next)
    }

    pub fn set_final_output(&self, output: &str, input: &str) -> Result<Arc<Session>> {
        let (next, ()) = self.update(|s| Ok((s.with_final_output(output, input)?, ())))?;
        Ok(next)
    }

    pub fn clear(&self) -> Arc<Session> {
        self.replace(Session::default())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::wire::{Category, Pattern, RefinementRecord};

    pub fn pattern(id: &str, name: &str, applied: bool) -> Pattern {
        Pattern {
            id: id.into(),
            name: name.into(),
            feedback: format!("feedback for {name}"),
            applied,
            description: String::new(),
        }
    }

    pub fn category(i: usize) -> Category {
        Category {
            id: format!("c{i}"),
            name: format!("Category {i}"),
            input: Some("Explain photosynthesis".into()),
            preview: format!("preview {i}"),
            patterns: vec![
                pattern(&format!("p{i}a"), "Persona", false),
                pattern(&format!("p{i}b"), "Recipe", true),
            ],
        }
    }

    /// Six categories, like a real classification.
    pub fn record() -> RefinementRecord {
        RefinementRecord {
            id: "r1".into(),
            user_id: Some("u1".into()),
            input: "Explain photosynthesis".into(),
            output: "Explain photosynthesis to a student.".into(),
            created_at: None,
            categories: (0..6).map(category).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::backend::fake::{Call, FakeBackend};
    use pretty_assertions::assert_eq;

    fn store_with(fake: Arc<FakeBackend>) -> ResponseStore {
        ResponseStore::new(fake)
    }

    #[test]
    fn create_decorates_and_unlocks() {
        let s = Session::created(record());
        assert_eq!(s.stage(), Stage::Created);
        assert_eq!(s.step(), 0);
        assert!(s.output().is_some());
        assert!(s.category(0).unwrap().patterns[0].description.starts_with("Responds in the voice"));
    }

    #[test]
    fn indeterminate_toggle_changes_nothing() {
        let s = Session::created(record());
        let (next, t) = s.with_toggle(2, 0, Toggle::Indeterminate).unwrap();
        assert_eq!(t, Toggled::Ignored);
        assert_eq!(next, s);
    }

    #[test]
    fn toggle_marks_preview_stale() {
        let s = Session::created(record());
        let (next, t) = s.with_toggle(2, 0, Toggle::On).unwrap();
        assert_eq!(t, Toggled::Changed);
        assert!(next.category(2).unwrap().patterns[0].applied);
        assert_eq!(next.preview(2), None);
        assert_eq!(next.preview(1), Some("preview 1"));
        let (_, again) = next.with_toggle(2, 0, Toggle::On).unwrap();
        assert_eq!(again, Toggled::Unchanged);
    }

    #[test]
    fn toggle_out_of_range_is_missing_data() {
        let s = Session::created(record());
        assert!(matches!(s.with_toggle(9, 0, Toggle::On), Err(RefineError::MissingData(_))));
        assert!(matches!(s.with_toggle(0, 9, Toggle::On), Err(RefineError::MissingData(_))));
    }

    #[test]
    fn applied_replaces_only_that_category_and_locks_output() {
        let s = Session::created(record());
        let mut server = category(3);
        server.preview = "new preview 3".into();
        server.patterns[0].applied = true;
        let next = s.with_applied(server.clone()).unwrap();

        let expected = decorate_category(server);
        assert_eq!(next.category(3).unwrap(), &expected);
        for i in (0..6).filter(|i| *i != 3) {
            assert_eq!(next.category(i), s.category(i));
        }
        assert_eq!(next.stage(), Stage::Stale);
        assert_eq!(next.output(), None);
    }

    #[test]
    fn final_output_roundtrip_is_local() {
        let s = Session::created(record());
        let next = s.with_final_output("Explain photosynthesis in three steps.", "Explain photosynthesis").unwrap();
        assert_eq!(next.output(), Some("Explain photosynthesis in three steps."));
        assert!(next.stage().final_pending());
    }

    #[test]
    fn final_output_refused_while_stale() {
        let s = Session::created(record()).with_applied(category(0)).unwrap();
        assert!(matches!(s.with_final_output("x", "y"), Err(RefineError::Rejected(_))));
    }

    #[test]
    fn merged_keeps_record_identity() {
        let s = Session::created(record()).with_applied(category(0)).unwrap();
        let mut server = record();
        server.output = "merged".into();
        let next = s.with_merged(server).unwrap();
        assert_eq!(next.stage(), Stage::Merged);
        assert_eq!(next.output(), Some("merged"));
        assert_eq!(next.record().unwrap().id, "r1");
    }

    #[tokio::test]
    async fn second_mutation_while_first_in_flight_is_busy() {
        let store = store_with(Arc::new(FakeBackend::default()));
        let slot = store.begin().unwrap();
        assert!(store.is_busy());
        assert!(matches!(store.begin(), Err(RefineError::Busy)));
        drop(slot);
        assert!(!store.is_busy());
        assert!(store.begin().is_ok());
    }

    #[tokio::test]
    async fn create_resets_step_and_records_call() {
        let fake = Arc::new(FakeBackend::default());
        *fake.create_reply.lock() = Some(record());
        let store = store_with(fake.clone());
        {
            let slot = store.begin().unwrap();
            store.create(&slot, "Explain photosynthesis").await.unwrap();
        }
        store.update(|s| Ok((s.with_step(4)?, ()))).unwrap();
        {
            let slot = store.begin().unwrap();
            let snap = store.create(&slot, "Explain photosynthesis").await.unwrap();
            assert_eq!(snap.step(), 0);
            assert_eq!(snap.category_count(), 6);
        }
        assert_eq!(fake.calls()[0], Call::Create("Explain photosynthesis".into()));
    }

    #[tokio::test]
    async fn failed_save_keeps_chosen_output() {
        let fake = Arc::new(FakeBackend::default());
        *fake.fail.lock() = true;
        let store = store_with(fake);
        store.update(|_| Ok((Session::created(record()), ()))).unwrap();
        store.set_final_output("chosen", "Explain photosynthesis").unwrap();
        let slot = store.begin().unwrap();
        let err = store.save(&slot, "r1", "chosen").await.unwrap_err();
        assert!(matches!(err, RefineError::Upstream(_)));
        let snap = store.snapshot();
        assert_eq!(snap.output(), Some("chosen"));
        assert_eq!(snap.stage(), Stage::Chosen);
    }

    #[test]
    fn clear_returns_to_empty() {
        let store = store_with(Arc::new(FakeBackend::default()));
        store.update(|_| Ok((Session::created(record()), ()))).unwrap();
        let snap = store.clear();
        assert_eq!(snap.stage(), Stage::Empty);
        assert!(snap.record().is_none());
        assert_eq!(snap.step(), 0);
    }
}
