use std::sync::Arc;

use ibms_infer::LlmEngine;
use ibms_types::{truncate_chars, ConversationTurn, LlmRequest, ModelOptions, PromptTemplate, QueryClass};
use tracing::{debug, warn};

pub const CLASSIFIER_PROMPT: &str = "Classify this message as DATABASE or GENERAL.

DATABASE = needs data from IBMS database (counts, lists, lookups, comparisons, statistics)
GENERAL = greeting, follow-up, explanation, opinion, or anything NOT needing a new database query

Reply with one word only: DATABASE or GENERAL
/no_think

Message: {message}";

pub const CLASSIFIER_MAX_TOKENS: u32 = 10;
pub const CLASSIFIER_REPEAT_PENALTY: f32 = 1.5;

/// How much prior conversation goes into the classification prompt.
#[derive(Clone, Copy, Debug)]
pub struct HistoryWindow {
    pub turns: usize,
    pub chars_per_turn: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            turns: 4,
            chars_per_turn: 150,
        }
    }
}

/// Decide whether a message needs a fresh database lookup.
pub struct IntentClassifier {
    engine: Arc<dyn LlmEngine>,
    model: String,
    window: HistoryWindow,
}

impl IntentClassifier {
    pub fn new(engine: Arc<dyn LlmEngine>, model: impl Into<String>, window: HistoryWindow) -> Self {
        Self {
            engine,
            model: model.into(),
            window,
        }
    }

    pub fn build_prompt(&self, message: &str, history: &[ConversationTurn]) -> String {
        let mut prompt = PromptTemplate::new(CLASSIFIER_PROMPT).render(&[("message", message)]);
        if !history.is_empty() && self.window.turns > 0 {
            let start = history.len().saturating_sub(self.window.turns);
            let context = history[start..]
                .iter()
                .map(|t| format!("{}: {}", t.role, truncate_chars(&t.text, self.window.chars_per_turn)))
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(&context);
        }
        prompt
    }

    /// Never fails: a model fault routes to [`QueryClass::Database`], whose
    /// query attempt still has to pass validation.
    pub async fn classify(&self, message: &str, history: &[ConversationTurn]) -> QueryClass {
        let req = LlmRequest::user_prompt(
            self.model.clone(),
            self.build_prompt(message, history),
            ModelOptions::deterministic(CLASSIFIER_MAX_TOKENS).with_repeat_penalty(CLASSIFIER_REPEAT_PENALTY),
        );
        match self.engine.complete(req).await {
            Ok(reply) => {
                let class = parse_label(&reply);
                debug!(reply = %reply.trim(), class = %class, "message classified");
                class
            }
            Err(e) => {
                warn!(error = %e, "classifier unavailable, defaulting to DATABASE");
                QueryClass::Database
            }
        }
    }
}

/// GENERAL only when the reply names GENERAL and not DATABASE.
pub fn parse_label(reply: &str) -> QueryClass {
    let upper = reply.to_uppercase();
    if upper.contains("GENERAL") && !upper.contains("DATABASE") {
        QueryClass::General
    } else {
        QueryClass::Database
    }
}
