//! Submit gating: local empty check plus a debounced call to an external
//! validator. Only the trailing call after the quiet period runs, and a
//! result that arrives after newer input is dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::prompt;
use crate::provider::DynProvider;
use crate::wire::ValidationResult;

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, text: &str) -> Result<ValidationResult>;
}

/// Validator backed by a JSON-mode completion.
pub struct LlmValidator {
    provider: DynProvider,
    model: String,
}

impl LlmValidator {
    pub fn new(provider: DynProvider, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }
}

#[async_trait]
impl Validator for LlmValidator {
    async fn validate(&self, text: &str) -> Result<ValidationResult> {
        let raw = self
            .provider
            .complete_json(&prompt::system_prompt_validate(), text, &self.model)
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

struct GateState {
    latest: ValidationResult,
    generation: u64,
    pending: Option<CancellationToken>,
    checking: bool,
}

#[derive(Clone)]
pub struct ValidationGate {
    validator: Arc<dyn Validator>,
    debounce: Duration,
    state: Arc<Mutex<GateState>>,
}

impl ValidationGate {
    pub fn new(validator: Arc<dyn Validator>, debounce: Duration) -> Self {
        Self {
            validator,
            debounce,
            state: Arc::new(Mutex::new(GateState {
                latest: ValidationResult::pending(),
                generation: 0,
                pending: None,
                checking: false,
            })),
        }
    }

    /// Latest known verdict.
    pub fn verdict(&self) -> ValidationResult {
        self.state.lock().latest.clone()
    }

    /// True from the keystroke until the trailing check has landed.
    pub fn is_checking(&self) -> bool {
        self.state.lock().checking
    }

    /// Feed the current input text. Empty input resolves immediately; any
    /// other text schedules a check after the debounce window and supersedes
    /// whatever was scheduled or running before.
    pub fn on_input(&self, text: &str) -> Option<JoinHandle<()>> {
        let (generation, token) = {
            let mut st = self.state.lock();
            st.generation += 1;
            if let Some(prev) = st.pending.take() {
                prev.cancel();
            }
            if text.trim().is_empty() {
                st.latest = ValidationResult::empty();
                st.checking = false;
                return None;
            }
            let token = CancellationToken::new();
            st.pending = Some(token.clone());
            // Counts as checking from the first keystroke, so a verdict for
            // older text never unlocks submit.
            st.checking = true;
            (st.generation, token)
        };

        let validator = self.validator.clone();
        let state = self.state.clone();
        let debounce = self.debounce;
        let text = text.to_string();

        Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }

            let verdict = match validator.validate(&text).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "prompt validator unavailable");
                    ValidationResult::unreachable()
                }
            };

            let mut st = state.lock();
            if st.generation != generation {
                tracing::debug!(generation, current = st.generation, "dropping stale validation result");
                return;
            }
            st.checking = false;
            st.pending = None;
            st.latest = verdict;
        }))
    }

    /// Cancel any scheduled check and forget the verdict.
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.generation += 1;
        if let Some(prev) = st.pending.take() {
            prev.cancel();
        }
        st.checking = false;
        st.latest = ValidationResult::pending();
    }
}
