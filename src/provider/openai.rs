use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{json_content, LineBuffer, Provider, TextStream};
use crate::errors::{RefineError, Result};
use crate::wire::ChatMessage;

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    client: Client,
}

impl OpenAIProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self { client: Client::builder().timeout(timeout).build()? })
    }

    fn api_key() -> Result<String> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| RefineError::Config("OPENAI_API_KEY env var is not set".into()))
    }

    async fn post(&self, body: serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(CHAT_URL)
            .bearer_auth(Self::api_key()?)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RefineError::Upstream(format!("OpenAI API error ({status}): {text}")));
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// One SSE line of a chat-completions stream. Only non-empty content
/// deltas produce text; keep-alives, role headers and `[DONE]` are skipped.
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<String>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map(Ok),
        Err(e) => Some(Err(RefineError::Upstream(format!("bad stream chunk: {e}")))),
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn complete_json(&self, system: &str, user: &str, model: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": 0.0,
            "response_format": { "type": "json_object" }
        });
        tracing::debug!(model, "openai completion");

        let text = self.post(body).await?.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| RefineError::Upstream(format!("failed to parse OpenAI response: {e}\nRaw: {text}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        json_content(&content)
    }

    async fn stream_chat(&self, messages: &[ChatMessage], model: &str) -> Result<TextStream> {
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": true
        });
        tracing::debug!(model, turns = messages.len(), "openai stream");

        let resp = self.post(body).await?;
        let mut lines = LineBuffer::default();
        let stream = resp
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String>> {
                match chunk {
                    Ok(bytes) => lines.push(&bytes).iter().filter_map(|l| parse_sse_line(l)).collect(),
                    Err(e) => vec![Err(e.into())],
                }
            })
            .flat_map(futures::stream::iter);
        Ok(stream.boxed())
    }
}
