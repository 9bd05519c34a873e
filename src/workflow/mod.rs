//! Drives one refinement session: input and validation, category stepping,
//! pattern application, merge, conversation and the final save.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::apply;
use crate::backend::DynBackend;
use crate::chat::{Conversation, TurnOutcome};
use crate::cli::Style;
use crate::config::Config;
use crate::errors::{RefineError, Result};
use crate::finalize;
use crate::log::ArtifactLog;
use crate::merge;
use crate::prompt;
use crate::provider::DynProvider;
use crate::store::{ResponseStore, Session, Toggle, Toggled};
use crate::validate::{ValidationGate, Validator};
use crate::wire::{Category, RefinementRecord, ValidationResult};

#[derive(Deserialize)]
struct GeneratedPrompt {
    #[serde(default)]
    prompt: String,
}

pub struct Workflow {
    store: ResponseStore,
    gate: ValidationGate,
    provider: DynProvider,
    conversation: Conversation,
    style: Style,
    input: String,
    chat_model: String,
    artifacts: Option<ArtifactLog>,
}

impl Workflow {
    pub fn new(backend: DynBackend, provider: DynProvider, validator: Arc<dyn Validator>, cfg: &Config) -> Self {
        if prompt::find_model(&cfg.chat_model).is_none() {
            tracing::warn!(model = %cfg.chat_model, "chat model is not in the catalog; passing it through");
        }
        Self {
            store: ResponseStore::new(backend),
            gate: ValidationGate::new(validator, cfg.debounce()),
            provider,
            conversation: Conversation::default(),
            style: Style::default(),
            input: String::new(),
            chat_model: cfg.chat_model.clone(),
            artifacts: cfg.save_artifacts.then(|| ArtifactLog::new(Path::new(&cfg.root))),
        }
    }

    pub fn snapshot(&self) -> Arc<Session> {
        self.store.snapshot()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn artifacts(&self) -> Option<&ArtifactLog> {
        self.artifacts.as_ref()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn set_style(&mut self, style: Style) {
        self.style = style;
    }

    pub fn verdict(&self) -> ValidationResult {
        self.gate.verdict()
    }

    pub fn is_checking(&self) -> bool {
        self.gate.is_checking()
    }

    pub fn is_busy(&self) -> bool {
        self.store.is_busy()
    }

    /// Replace the draft. The returned handle resolves once the debounced
    /// check has run (or was superseded).
    pub fn set_input(&mut self, text: &str) -> Option<JoinHandle<()>> {
        self.input = text.to_string();
        self.gate.on_input(text)
    }

    pub fn can_submit(&self) -> bool {
        !self.input.trim().is_empty() && !self.gate.is_checking() && self.gate.verdict().valid && !self.store.is_busy()
    }

    /// Create a record from the draft. With the `Generate` style the draft
    /// is first turned into a prompt.
    pub async fn submit(&mut self) -> Result<Arc<Session>> {
        if self.input.trim().is_empty() {
            return Err(RefineError::Validation(ValidationResult::empty().feedback));
        }
        if self.gate.is_checking() {
            return Err(RefineError::Validation("still checking the prompt".into()));
        }
        let verdict = self.gate.verdict();
        if !verdict.valid {
            let why = if verdict.feedback.is_empty() { verdict.reason } else { verdict.feedback };
            return Err(RefineError::Validation(why));
        }

        let snap = {
            let slot = self.store.begin()?;
            let text = match self.style {
                Style::Improve => self.input.clone(),
                Style::Generate => self.generate_prompt().await?,
            };
            self.store.create(&slot, &text).await?
        };
        if let Some(r) = snap.record() {
            self.input = r.input.clone();
        }
        self.conversation = match snap.output() {
            Some(out) => Conversation::seeded(out),
            None => Conversation::default(),
        };
        self.note("create", &snap);
        Ok(snap)
    }

    async fn generate_prompt(&self) -> Result<String> {
        tracing::info!("{}", prompt::generate_banner(&self.input));
        let raw = self
            .provider
            .complete_json(&prompt::system_prompt_generate(), &self.input, &self.chat_model)
            .await?;
        let generated: GeneratedPrompt = serde_json::from_str(&raw)?;
        if generated.prompt.trim().is_empty() {
            return Err(RefineError::Upstream("prompt generator returned an empty prompt".into()));
        }
        Ok(generated.prompt)
    }

    pub fn goto(&self, i: usize) -> Result<Arc<Session>> {
        Ok(self.store.update(|s| Ok((s.with_step(i)?, ())))?.0)
    }

    pub fn next(&self) -> Result<Arc<Session>> {
        Ok(self.store.update(|s| Ok((s.with_next()?, ())))?.0)
    }

    pub fn prev(&self) -> Result<Arc<Session>> {
        Ok(self.store.update(|s| Ok((s.with_prev()?, ())))?.0)
    }

    /// Flip a checkbox in the category currently shown.
    pub fn toggle(&self, pattern: usize, toggle: Toggle) -> Result<Toggled> {
        let step = self.store.snapshot().step();
        apply::toggle(&self.store, step, pattern, toggle)
    }

    /// Apply the checkboxes of the category currently shown.
    pub async fn apply(&self) -> Result<Category> {
        let step = self.store.snapshot().step();
        let category = apply::apply(&self.store, step).await?;
        self.note("apply", &self.store.snapshot());
        Ok(category)
    }

    /// Merge is offered from the last category only.
    pub async fn merge(&mut self) -> Result<Arc<Session>> {
        let snap = self.store.snapshot();
        if snap.record().is_some() && !snap.is_last_step() {
            return Err(RefineError::Rejected(format!(
                "at category {} of {}; step through to the last one before merging",
                snap.step() + 1,
                snap.category_count()
            )));
        }
        let merged = merge::merge(&self.store).await?;
        if let Some(r) = merged.record() {
            self.input = r.input.clone();
        }
        if let Some(out) = merged.output() {
            self.conversation = Conversation::seeded(out);
        }
        self.note("merge", &merged);
        Ok(merged)
    }

    fn require_output(&self) -> Result<()> {
        let snap = self.store.snapshot();
        if snap.record().is_none() {
            return Err(RefineError::MissingData("no active record".into()));
        }
        if snap.output().is_none() {
            return Err(RefineError::Rejected("merge the previews before refining the output".into()));
        }
        Ok(())
    }

    pub async fn chat(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
        on_chunk: impl FnMut(&str),
    ) -> Result<TurnOutcome> {
        self.require_output()?;
        self.conversation
            .send(text, self.provider.as_ref(), &self.chat_model, cancel, on_chunk)
            .await
    }

    pub async fn retry_chat(&mut self, cancel: &CancellationToken, on_chunk: impl FnMut(&str)) -> Result<TurnOutcome> {
        self.require_output()?;
        self.conversation
            .regenerate(self.provider.as_ref(), &self.chat_model, cancel, on_chunk)
            .await
    }

    /// Take the latest assistant turn as the record's output. Local only.
    pub fn accept(&self) -> Result<Arc<Session>> {
        let text = self.conversation.accept()?;
        let snap = self.store.snapshot();
        let input = match snap.record() {
            Some(r) if self.input.trim().is_empty() => r.input.clone(),
            _ => self.input.clone(),
        };
        self.store.set_final_output(text, &input)
    }

    pub async fn save(&self) -> Result<Arc<Session>> {
        let saved = finalize::save(&self.store).await?;
        self.note("update", &saved);
        Ok(saved)
    }

    /// `(input, output)` pair for the before/after view.
    pub fn comparison(&self) -> Option<(String, String)> {
        let snap = self.store.snapshot();
        let output = snap.output()?.to_string();
        snap.record().map(|r| (r.input.clone(), output))
    }

    /// Make a stored record the active one, with every stage open.
    pub async fn load(&mut self, record_id: &str) -> Result<Arc<Session>> {
        let snap = {
            let slot = self.store.begin()?;
            self.store.load(&slot, record_id).await?
        };
        self.gate.reset();
        if let Some(r) = snap.record() {
            self.input = r.input.clone();
            self.conversation = Conversation::seeded(&r.output);
        }
        Ok(snap)
    }

    pub async fn history(&self) -> Result<Vec<RefinementRecord>> {
        let records = self.store.backend().list_records().await?;
        Ok(records.into_iter().map(prompt::decorate_record).collect())
    }

    pub async fn show(&self, record_id: &str) -> Result<RefinementRecord> {
        Ok(prompt::decorate_record(self.store.backend().get_record(record_id).await?))
    }

    /// Removes a stored record. The active session is left alone.
    pub async fn delete(&self, record_id: &str) -> Result<()> {
        self.store.backend().delete_record(record_id).await?;
        tracing::info!(record = record_id, "record deleted");
        Ok(())
    }

    /// Back to a blank draft.
    pub fn new_record(&mut self) -> Arc<Session> {
        self.gate.reset();
        self.conversation = Conversation::default();
        self.input.clear();
        self.store.clear()
    }

    fn note(&self, stage: &str, snap: &Session) {
        let (Some(log), Some(record)) = (&self.artifacts, snap.record()) else {
            return;
        };
        if let Err(e) = log.save_stage(stage, record) {
            tracing::warn!(stage, error = %e, "could not write artifact");
        }
    }
}
