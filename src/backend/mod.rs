use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::Result;
use crate::wire::{Category, PatternSelection, RefinementRecord};

pub mod http;

/// The refinement service. Classification and rewriting happen behind it;
/// the client only orchestrates calls and keeps the returned state.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_record(&self, input: &str) -> Result<RefinementRecord>;
    async fn apply_category_patterns(
        &self,
        category_id: &str,
        patterns: &[PatternSelection],
    ) -> Result<Category>;
    async fn merge_previews(&self, record_id: &str, previews: &[String]) -> Result<RefinementRecord>;
    async fn update_record(&self, record_id: &str, output: &str) -> Result<RefinementRecord>;
    async fn list_records(&self) -> Result<Vec<RefinementRecord>>;
    async fn get_record(&self, record_id: &str) -> Result<RefinementRecord>;
    async fn delete_record(&self, record_id: &str) -> Result<()>;
}

pub type DynBackend = Arc<dyn Backend>;

pub fn make_backend(cfg: &Config) -> Result<DynBackend> {
    Ok(Arc::new(http::HttpBackend::new(
        cfg.api_base(),
        cfg.api_token.clone(),
        cfg.timeout(),
    )?))
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend that records every call it receives.

    use super::*;
    use crate::errors::RefineError;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Create(String),
        Apply(String, Vec<PatternSelection>),
        Merge(String, Vec<String>),
        Update(String, String),
        List,
        Get(String),
        Delete(String),
    }

    #[derive(Default)]
    pub struct FakeBackend {
        pub calls: Mutex<Vec<Call>>,
        pub create_reply: Mutex<Option<RefinementRecord>>,
        pub apply_reply: Mutex<Option<Category>>,
        pub merge_reply: Mutex<Option<RefinementRecord>>,
        pub update_reply: Mutex<Option<RefinementRecord>>,
        pub records: Mutex<Vec<RefinementRecord>>,
        /// When set, every call fails with an upstream error.
        pub fail: Mutex<bool>,
    }

    impl FakeBackend {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn record_call(&self, call: Call) -> Result<()> {
            self.calls.lock().push(call);
            if *self.fail.lock() {
                return Err(RefineError::Upstream("503 Service Unavailable".into()));
            }
            Ok(())
        }

        fn reply<T: Clone>(slot: &Mutex<Option<T>>, what: &str) -> Result<T> {
            slot.lock()
                .clone()
                .ok_or_else(|| RefineError::Upstream(format!("no canned {what} reply")))
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn create_record(&self, input: &str) -> Result<RefinementRecord> {
            self.record_call(Call::Create(input.into()))?;
            Self::reply(&self.create_reply, "create")
        }

        async fn apply_category_patterns(
            &self,
            category_id: &str,
            patterns: &[PatternSelection],
        ) -> Result<Category> {
            self.record_call(Call::Apply(category_id.into(), patterns.to_vec()))?;
            Self::reply(&self.apply_reply, "apply")
        }

        async fn merge_previews(&self, record_id: &str, previews: &[String]) -> Result<RefinementRecord> {
            self.record_call(Call::Merge(record_id.into(), previews.to_vec()))?;
            Self::reply(&self.merge_reply, "merge")
        }

        async fn update_record(&self, record_id: &str, output: &str) -> Result<RefinementRecord> {
            self.record_call(Call::Update(record_id.into(), output.into()))?;
            Self::reply(&self.update_reply, "update")
        }

        async fn list_records(&self) -> Result<Vec<RefinementRecord>> {
            self.record_call(Call::List)?;
            Ok(self.records.lock().clone())
        }

        async fn get_record(&self, record_id: &str) -> Result<RefinementRecord> {
            self.record_call(Call::Get(record_id.into()))?;
            self.records
                .lock()
                .iter()
                .find(|r| r.id == record_id)
                .cloned()
                .ok_or_else(|| RefineError::Upstream("404 Response not found".into()))
        }

        async fn delete_record(&self, record_id: &str) -> Result<()> {
            self.record_call(Call::Delete(record_id.into()))?;
            self.records.lock().retain(|r| r.id != record_id);
            Ok(())
        }
    }
}
