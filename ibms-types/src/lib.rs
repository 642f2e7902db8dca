use std::fmt;
use std::time::Duration;

pub mod prompt;
pub use prompt::{PromptTemplate, TemplateError};

pub mod result_set;
pub use result_set::ResultSet;

/// Speaker of a message, both in the conversation and at the model boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing label produced by the intent classifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum QueryClass {
    /// Needs fresh data from the IBMS database.
    Database,
    /// Greeting, follow-up, explanation: no new lookup.
    General,
}

impl QueryClass {
    pub fn label(&self) -> &'static str {
        match self {
            QueryClass::Database => "DATABASE",
            QueryClass::General => "GENERAL",
        }
    }
}

impl fmt::Display for QueryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// States a single user turn moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TurnStage {
    Received,
    Classified,
    Generating,
    Generated,
    Validating,
    Rejected,
    Validated,
    Executing,
    ExecFailed,
    Executed,
    Narrating,
    Done,
}

impl TurnStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnStage::Rejected | TurnStage::ExecFailed | TurnStage::Done)
    }
}

/// Metadata recorded for an executed query.
#[derive(Clone, Debug)]
pub struct ExecutionMeta {
    pub sql: String,
    pub row_count: usize,
    pub exec_time: Duration,
}

/// One entry in a session's conversation. Turns are only ever appended.
#[derive(Clone, Debug)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub result: Option<ResultSet>,
    pub meta: Option<ExecutionMeta>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            result: None,
            meta: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            result: None,
            meta: None,
        }
    }
}

/// Single role-tagged message handed to the model.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Sampling options forwarded to the model backend. `None` leaves the backend default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    /// Maximum number of output tokens.
    pub num_predict: Option<u32>,
}

impl ModelOptions {
    /// Temperature 0 with a bounded output length.
    pub fn deterministic(num_predict: u32) -> Self {
        Self {
            temperature: Some(0.0),
            num_predict: Some(num_predict),
            ..Self::default()
        }
    }

    pub fn with_repeat_penalty(mut self, penalty: f32) -> Self {
        self.repeat_penalty = Some(penalty);
        self
    }
}

/// Single LLM request handed to the inference engine.
#[derive(Clone, Debug)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub options: ModelOptions,
}

impl LlmRequest {
    /// Request carrying one user message, which is how every pipeline prompt is sent.
    pub fn user_prompt(model: impl Into<String>, prompt: impl Into<String>, options: ModelOptions) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: prompt.into(),
            }],
            options,
        }
    }

    /// Put a system message ahead of the existing messages.
    pub fn with_system(mut self, instructions: impl Into<String>) -> Self {
        self.messages.insert(
            0,
            ChatMessage {
                role: Role::System,
                content: instructions.into(),
            },
        );
        self
    }

    /// Concatenated message text, mostly useful in tests and logs.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Cut `text` to at most `budget` characters without splitting a code point.
pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
