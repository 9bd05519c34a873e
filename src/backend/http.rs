use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::Backend;
use crate::errors::{RefineError, Result};
use crate::wire::{
    ApplyPayload, Category, CreatePayload, MergePayload, PatternSelection, RefinementRecord,
    UpdatePayload,
};

/// JSON-over-HTTP client for the refinement service.
pub struct HttpBackend {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base: base.trim_end_matches('/').to_string(), token })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder, what: &str) -> Result<Response> {
        let resp = self.authed(rb).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, op = what, "backend rejected request");
            return Err(RefineError::Upstream(format!("{what} failed ({status}): {}", body.trim())));
        }
        Ok(resp)
    }

    async fn json<T: DeserializeOwned>(&self, rb: RequestBuilder, what: &str) -> Result<T> {
        let resp = self.send(rb, what).await?;
        let text = resp.text().await?;
        tracing::debug!(op = what, bytes = text.len(), "backend reply");
        Ok(serde_json::from_str(&text)?)
    }
}

pub fn records_path() -> &'static str {
    "responses/"
}

pub fn record_path(id: &str) -> String {
    format!("responses/{id}")
}

pub fn update_path(id: &str) -> String {
    format!("responses/update/{id}")
}

pub fn merge_path(id: &str) -> String {
    format!("responses/merge/{id}")
}

pub fn patterns_path(category_id: &str) -> String {
    format!("categories/{category_id}/patterns")
}

#[async_trait]
impl Backend for HttpBackend {
    async fn create_record(&self, input: &str) -> Result<RefinementRecord> {
        let rb = self.client.post(self.url(records_path())).json(&CreatePayload { input });
        self.json(rb, "create").await
    }

    async fn apply_category_patterns(
        &self,
        category_id: &str,
        patterns: &[PatternSelection],
    ) -> Result<Category> {
        let payload = ApplyPayload { patterns: patterns.to_vec() };
        let rb = self.client.put(self.url(&patterns_path(category_id))).json(&payload);
        self.json(rb, "apply").await
    }

    async fn merge_previews(&self, record_id: &str, previews: &[String]) -> Result<RefinementRecord> {
        let payload = MergePayload { previews: previews.to_vec() };
        let rb = self.client.put(self.url(&merge_path(record_id))).json(&payload);
        self.json(rb, "merge").await
    }

    async fn update_record(&self, record_id: &str, output: &str) -> Result<RefinementRecord> {
        let rb = self.client.put(self.url(&update_path(record_id))).json(&UpdatePayload { output });
        self.json(rb, "update").await
    }

    async fn list_records(&self) -> Result<Vec<RefinementRecord>> {
        let rb = self.client.get(self.url(records_path()));
        self.json(rb, "list").await
    }

    async fn get_record(&self, record_id: &str) -> Result<RefinementRecord> {
        let rb = self.client.get(self.url(&record_path(record_id)));
        self.json(rb, "get").await
    }

    async fn delete_record(&self, record_id: &str) -> Result<()> {
        let rb = self.client.delete(self.url(&record_path(record_id)));
        self.send(rb, "delete").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let b = HttpBackend::new("http://back_end:80/api/v1/".into(), None, Duration::from_secs(5)).unwrap();
        assert_eq!(b.url(records_path()), "http://back_end:80/api/v1/responses/");
        assert_eq!(b.url(&merge_path("r1")), "http://back_end:80/api/v1/responses/merge/r1");
        assert_eq!(b.url(&patterns_path("c9")), "http://back_end:80/api/v1/categories/c9/patterns");
        assert_eq!(b.url(&update_path("r1")), "http://back_end:80/api/v1/responses/update/r1");
    }
}
