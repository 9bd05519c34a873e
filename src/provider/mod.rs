use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::errors::{RefineError, Result};
use crate::wire::ChatMessage;

pub mod openai;
pub mod ollama;

/// Text chunks of one assistant reply, in arrival order.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Text-generation endpoint used for validation, prompt generation and the
/// refinement conversation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// One non-streamed reply that must be a single JSON object.
    async fn complete_json(&self, system: &str, user: &str, model: &str) -> Result<String>;
    /// A streamed assistant reply to the given history.
    async fn stream_chat(&self, messages: &[ChatMessage], model: &str) -> Result<TextStream>;
}

pub type DynProvider = Arc<dyn Provider>;

pub fn make_provider(
    kind: ProviderKind,
    timeout_secs: u64,
    ollama_url: Option<String>,
) -> Result<DynProvider> {
    let timeout = Duration::from_secs(timeout_secs);
    match kind {
        ProviderKind::OpenAI => Ok(Arc::new(openai::OpenAIProvider::new(timeout)?)),
        ProviderKind::Ollama => {
            let url = ollama_url
                .ok_or_else(|| RefineError::Config("ollama provider needs ollama_url".into()))?;
            Ok(Arc::new(ollama::OllamaProvider::new(url, timeout)?))
        }
    }
}

/// Splits a byte stream into complete lines. Partial lines stay buffered
/// until their newline arrives.
#[derive(Default)]
pub(crate) struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }
}

/// Extracts the first top-level JSON object substring from a string.
/// Handles nested braces; returns None if not found.
pub(crate) fn extract_first_json_object(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut start = None;
    let mut depth = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        if b == b'{' {
            if start.is_none() {
                start = Some(i);
            }
            depth += 1;
        } else if b == b'}' && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(st) = start {
                    return Some(s[st..=i].to_string());
                }
            }
        }
    }
    None
}

/// Model content that should be a JSON object, tolerating surrounding prose.
pub(crate) fn json_content(content: &str) -> Result<String> {
    let trimmed = content.trim();
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }
    extract_first_json_object(trimmed).ok_or_else(|| {
        RefineError::Upstream(format!(
            "model did not return a JSON object.\n--- content start ---\n{content}\n--- content end ---"
        ))
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;

    /// Provider with canned replies; stream chunks come from a queue of scripts.
    #[derive(Default)]
    pub struct FakeProvider {
        pub json_replies: Mutex<Vec<Result<String>>>,
        pub scripts: Mutex<Vec<Vec<Result<String>>>>,
        pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn complete_json(&self, _system: &str, user: &str, _model: &str) -> Result<String> {
            self.seen.lock().push(vec![ChatMessage::user(user)]);
            let mut q = self.json_replies.lock();
            if q.is_empty() {
                return Err(RefineError::Upstream("no canned reply".into()));
            }
            q.remove(0)
        }

        async fn stream_chat(&self, messages: &[ChatMessage], _model: &str) -> Result<TextStream> {
            self.seen.lock().push(messages.to_vec());
            let mut q = self.scripts.lock();
            if q.is_empty() {
                return Err(RefineError::Upstream("connection refused".into()));
            }
            Ok(futures::stream::iter(q.remove(0)).boxed())
        }
    }
}
