//! Refinement conversation: append-only history seeded with the merged
//! output, one streamed reply at a time.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::errors::{RefineError, Result};
use crate::prompt;
use crate::provider::Provider;
use crate::wire::{ChatMessage, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// Stopped by the user; whatever streamed before the stop is kept.
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn seeded(output: &str) -> Self {
        Self { messages: vec![ChatMessage::assistant(output)] }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_assistant(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Text of the turn to take as final. Refused while the user has the
    /// last word or before the first reply.
    pub fn accept(&self) -> Result<&str> {
        match self.messages.last() {
            Some(_) if self.messages.len() == 1 => Err(RefineError::Rejected(
                "the output has not been refined yet; send a message first".into(),
            )),
            Some(m) if m.role == Role::Assistant => Ok(&m.content),
            Some(_) => Err(RefineError::Rejected(
                "the last message is yours; wait for a reply before choosing it".into(),
            )),
            None => Err(RefineError::MissingData("nothing to accept yet".into())),
        }
    }

    /// Append a user turn and stream the assistant's answer.
    pub async fn send(
        &mut self,
        text: &str,
        provider: &dyn Provider,
        model: &str,
        cancel: &CancellationToken,
        on_chunk: impl FnMut(&str),
    ) -> Result<TurnOutcome> {
        if self.messages.is_empty() {
            return Err(RefineError::MissingData("conversation has no seed output".into()));
        }
        if text.trim().is_empty() {
            return Err(RefineError::Validation("message cannot be empty".into()));
        }
        self.messages.push(ChatMessage::user(text));
        self.generate(provider, model, cancel, on_chunk).await
    }

    /// Ask again after a failed or stopped turn that left the user with the
    /// last word.
    pub async fn regenerate(
        &mut self,
        provider: &dyn Provider,
        model: &str,
        cancel: &CancellationToken,
        on_chunk: impl FnMut(&str),
    ) -> Result<TurnOutcome> {
        match self.messages.last() {
            Some(m) if m.role == Role::User => self.generate(provider, model, cancel, on_chunk).await,
            _ => Err(RefineError::Rejected("no unanswered message to retry".into())),
        }
    }

    async fn generate(
        &mut self,
        provider: &dyn Provider,
        model: &str,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<TurnOutcome> {
        let request = prompt::conversation_request(&self.messages);
        tracing::info!(model, turns = request.len(), "generating reply");

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
            s = provider.stream_chat(&request, model) => s,
        };
        let mut stream = opened.map_err(|e| {
            tracing::warn!(error = %e, "generation failed to start");
            e
        })?;

        let mut reply = String::new();
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(TurnOutcome::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        on_chunk(&text);
                        reply.push_str(&text);
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(TurnOutcome::Completed),
                },
            }
        };

        match &outcome {
            Ok(TurnOutcome::Cancelled) => tracing::info!(chars = reply.len(), "generation stopped"),
            Ok(TurnOutcome::Completed) => tracing::debug!(chars = reply.len(), "generation finished"),
            Err(e) => tracing::warn!(error = %e, chars = reply.len(), "generation broke off"),
        }
        if !reply.is_empty() {
            self.messages.push(ChatMessage::assistant(reply));
        } else if matches!(outcome, Ok(TurnOutcome::Completed)) {
            return Err(RefineError::Upstream("model returned an empty reply".into()));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeProvider;
    use crate::provider::TextStream;
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Streams whatever the test pushes into the channel.
    struct ChannelProvider {
        rx: Mutex<Option<mpsc::UnboundedReceiver<Result<String>>>>,
    }

    #[async_trait]
    impl Provider for ChannelProvider {
        async fn complete_json(&self, _: &str, _: &str, _: &str) -> Result<String> {
            Err(RefineError::Upstream("not used".into()))
        }

        async fn stream_chat(&self, _: &[ChatMessage], _: &str) -> Result<TextStream> {
            let rx = self.rx.lock().take().ok_or_else(|| RefineError::Upstream("drained".into()))?;
            Ok(rx.boxed())
        }
    }

    fn scripted(chunks: &[&str]) -> FakeProvider {
        let p = FakeProvider::default();
        p.scripts.lock().push(chunks.iter().map(|c| Ok(c.to_string())).collect());
        p
    }

    #[tokio::test]
    async fn reply_is_streamed_into_one_message() {
        let p = scripted(&["Explain ", "photosynthesis ", "in three steps."]);
        let mut convo = Conversation::seeded("Explain photosynthesis.");
        let mut seen = Vec::new();
        let outcome = convo
            .send("use steps", &p, "gpt-4o", &CancellationToken::new(), |c| seen.push(c.to_string()))
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(seen.len(), 3);
        assert_eq!(convo.messages().len(), 3);
        assert_eq!(convo.accept().unwrap(), "Explain photosynthesis in three steps.");
        let requests = p.seen.lock();
        assert!(requests[0][1].content.starts_with("Rewrite the prompt above"));
    }

    #[tokio::test]
    async fn cancel_keeps_partial_text() {
        let (tx, rx) = mpsc::unbounded();
        let p = ChannelProvider { rx: Mutex::new(Some(rx)) };
        let cancel = CancellationToken::new();
        let mut convo = Conversation::seeded("Explain photosynthesis.");

        let turn = convo.send("shorter", &p, "gpt-4o", &cancel, |_| {});
        let drive = async {
            tx.unbounded_send(Ok("Explain ".into())).unwrap();
            tx.unbounded_send(Ok("photo".into())).unwrap();
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
            let _ = tx.unbounded_send(Ok("late".into()));
        };
        let (outcome, ()) = tokio::join!(turn, drive);

        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        assert_eq!(convo.last_assistant(), Some("Explain photo"));
        assert_eq!(convo.messages().len(), 3);
    }

    #[tokio::test]
    async fn cancel_before_any_chunk_leaves_user_last() {
        let (_tx, rx) = mpsc::unbounded::<Result<String>>();
        let p = ChannelProvider { rx: Mutex::new(Some(rx)) };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut convo = Conversation::seeded("base");
        let outcome = convo.send("more", &p, "gpt-4o", &cancel, |_| {}).await.unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert!(matches!(convo.accept(), Err(RefineError::Rejected(_))));
        assert_eq!(convo.last_assistant(), Some("base"));
    }

    #[tokio::test]
    async fn failed_start_is_retryable() {
        let p = FakeProvider::default();
        let mut convo = Conversation::seeded("base");
        let err = convo
            .send("more detail", &p, "gpt-4o", &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RefineError::Upstream(_)));
        assert!(matches!(convo.accept(), Err(RefineError::Rejected(_))));

        p.scripts.lock().push(vec![Ok("base, with detail".into())]);
        convo.regenerate(&p, "gpt-4o", &CancellationToken::new(), |_| {}).await.unwrap();
        assert_eq!(convo.accept().unwrap(), "base, with detail");
        assert_eq!(convo.messages().len(), 3);
    }

    #[tokio::test]
    async fn mid_stream_error_keeps_what_arrived() {
        let p = FakeProvider::default();
        p.scripts
            .lock()
            .push(vec![Ok("half ".into()), Err(RefineError::Upstream("connection reset".into()))]);
        let mut convo = Conversation::seeded("base");
        let res = convo.send("go", &p, "gpt-4o", &CancellationToken::new(), |_| {}).await;
        assert!(res.is_err());
        assert_eq!(convo.last_assistant(), Some("half "));
    }

    #[test]
    fn seed_alone_cannot_be_accepted() {
        let convo = Conversation::seeded("base");
        assert!(matches!(convo.accept(), Err(RefineError::Rejected(_))));
        assert!(matches!(Conversation::default().accept(), Err(RefineError::MissingData(_))));
    }
}
