use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use ibms_types::LlmRequest;
use thiserror::Error;

pub mod ollama;
pub use ollama::HttpOllamaEngine;

pub mod scripted;
pub use scripted::{ScriptedLlmEngine, ScriptedReply};

#[derive(Clone, Debug)]
pub struct LlmToken {
    pub token_id: u32,
    pub text: String,
}

pub type TokenStream =
    Pin<Box<dyn Stream<Item = Result<LlmToken, LlmError>> + Send>>;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The model invocation boundary. Given a prompt, return text, either whole
/// or as an incremental fragment stream terminated by end-of-stream.
#[async_trait]
pub trait LlmEngine: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<String, LlmError>;

    async fn stream(&self, req: LlmRequest) -> Result<TokenStream, LlmError>;
}
