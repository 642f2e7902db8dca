use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use ibms_types::LlmRequest;

use crate::{LlmEngine, LlmError, LlmToken, TokenStream};

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

/// Deterministic engine that replays canned replies in order and records
/// every request it receives. Streamed replies are split into fixed-size
/// character chunks.
pub struct ScriptedLlmEngine {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<LlmRequest>>,
    chunk_chars: usize,
}

impl ScriptedLlmEngine {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: 4,
        }
    }

    /// Every reply succeeds with the given text.
    pub fn texts<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::new(replies.into_iter().map(|s| ScriptedReply::Text(s.into())))
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn next_reply(&self, req: LlmRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .map_err(|_| LlmError::new("scripted engine lock poisoned"))?
            .push(req);
        let reply = self
            .replies
            .lock()
            .map_err(|_| LlmError::new("scripted engine lock poisoned"))?
            .pop_front();
        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(LlmError::new(message)),
            None => Err(LlmError::new("scripted engine has no reply left")),
        }
    }
}

#[async_trait]
impl LlmEngine for ScriptedLlmEngine {
    async fn complete(&self, req: LlmRequest) -> Result<String, LlmError> {
        self.next_reply(req)
    }

    async fn stream(&self, req: LlmRequest) -> Result<TokenStream, LlmError> {
        let text = self.next_reply(req)?;
        let chars: Vec<char> = text.chars().collect();
        let tokens: Vec<Result<LlmToken, LlmError>> = chars
            .chunks(self.chunk_chars)
            .enumerate()
            .map(|(i, chunk)| {
                Ok(LlmToken {
                    token_id: i as u32,
                    text: chunk.iter().collect(),
                })
            })
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

#[cfg(test)]
mod tests {
    use ibms_types::ModelOptions;

    use futures_util::StreamExt;

    use super::*;

    fn req(prompt: &str) -> LlmRequest {
        LlmRequest::user_prompt("test-model", prompt, ModelOptions::default())
    }

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let engine = ScriptedLlmEngine::new(vec![
            ScriptedReply::Text("first".into()),
            ScriptedReply::Fail("boom".into()),
        ]);
        assert_eq!(engine.complete(req("a")).await.unwrap(), "first");
        assert_eq!(engine.complete(req("b")).await.unwrap_err().message, "boom");
        assert!(engine.complete(req("c")).await.is_err());
        let prompts: Vec<String> = engine.requests().iter().map(|r| r.prompt_text()).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn stream_splits_into_chunks() {
        let engine = ScriptedLlmEngine::texts(["héllo world"]).with_chunk_chars(3);
        let chunks: Vec<String> = engine
            .stream(req("x"))
            .await
            .unwrap()
            .map(|t| t.unwrap().text)
            .collect()
            .await;
        assert_eq!(chunks, vec!["hél", "lo ", "wor", "ld"]);
        assert_eq!(engine.remaining(), 0);
    }
}
