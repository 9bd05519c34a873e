use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{json_content, LineBuffer, Provider, TextStream};
use crate::errors::{RefineError, Result};
use crate::wire::ChatMessage;

pub struct OllamaProvider {
    url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        Ok(Self { url, client: Client::builder().timeout(timeout).build()? })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.url.trim_end_matches('/'))
    }

    async fn post(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let resp = self.client.post(self.chat_url()).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RefineError::Upstream(format!("ollama error ({status}): {text}")));
        }
        Ok(resp)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<MsgOut>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct MsgOut {
    #[serde(default)]
    content: String,
}

/// One NDJSON line of a streamed `/api/chat` reply.
pub(crate) fn parse_stream_line(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChatResponse>(line) {
        Ok(ChatResponse { done: true, .. }) => None,
        Ok(r) => r.message.map(|m| m.content).filter(|c| !c.is_empty()).map(Ok),
        Err(e) => Some(Err(RefineError::Upstream(format!("bad ollama chunk: {e}")))),
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete_json(&self, system: &str, user: &str, model: &str) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let body = ChatRequest {
            model,
            messages: &messages,
            stream: false,
            format: Some("json"),
            options: OllamaOptions { temperature: 0.0 },
        };
        tracing::debug!(url = %self.chat_url(), model, "ollama completion");

        let text = self.post(&body).await?.text().await?;
        // Fall back to the raw body when it is not the standard envelope.
        let content = match serde_json::from_str::<ChatResponse>(&text) {
            Ok(ChatResponse { message: Some(m), .. }) => m.content,
            _ => text,
        };
        json_content(&content)
    }

    async fn stream_chat(&self, messages: &[ChatMessage], model: &str) -> Result<TextStream> {
        let body = ChatRequest {
            model,
            messages,
            stream: true,
            format: None,
            options: OllamaOptions { temperature: 0.7 },
        };
        tracing::debug!(url = %self.chat_url(), model, "ollama stream");

        let resp = self.post(&body).await?;
        let mut lines = LineBuffer::default();
        let stream = resp
            .bytes_stream()
            .map(move |chunk| -> Vec<Result<String>> {
                match chunk {
                    Ok(bytes) => lines.push(&bytes).iter().filter_map(|l| parse_stream_line(l)).collect(),
                    Err(e) => vec![Err(e.into())],
                }
            })
            .flat_map(futures::stream::iter);
        Ok(stream.boxed())
    }
}
