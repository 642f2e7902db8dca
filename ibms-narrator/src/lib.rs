use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use ibms_infer::{LlmEngine, LlmError};
use ibms_sanitizer::sanitize;
use ibms_types::{truncate_chars, ConversationTurn, LlmRequest, ModelOptions, PromptTemplate, ResultSet};
use tracing::debug;

pub mod surface;
pub use surface::{CapturedSurface, NullSurface, OutputSurface};

pub const NARRATION_PROMPT: &str = "You are a senior FIA intelligence analyst. An officer asked a question and the system queried the IBMS database. Below are the results.

Write a professional intelligence briefing based ONLY on the data provided.

Rules:
- Lead with the key finding that directly answers the question.
- Include all important numbers exactly as shown (counts, percentages, dates).
- If results have rankings/tables, present and analyze them.
- If 0 rows returned, say \"No records found\" and suggest why.
- Do NOT invent data. Do NOT mention SQL or databases.
- Match response length to complexity: simple counts get 2-3 sentences, complex analyses get detailed paragraphs.
- End with a brief operational insight when the data warrants it.
- Do NOT pad your response to fill space. Be thorough but not verbose.

QUESTION: {question}

RESULTS:
{results}

Briefing:";

pub const GENERAL_SYSTEM_PROMPT: &str = "You are an AI assistant for FIA (Federal Investigation Agency) Pakistan, specializing in the IBMS (Integrated Border Management System).

Guidelines:
- Match your response length to the question. Short questions get short answers. Detailed questions get detailed answers.
- For greetings (hello, hi, etc.), respond briefly and warmly. Introduce yourself in 1-2 sentences and ask how you can help.
- For follow-up questions about previous answers, provide relevant analysis or clarification.
- For FIA/IBMS concept questions, explain clearly with relevant context.
- If the officer needs specific data, suggest they ask a data question.
- Be professional but conversational. Do NOT pad responses with unnecessary information.
- Do NOT invent stories or hypothetical scenarios unless explicitly asked.";

pub const NO_THINK: &str = "/no_think";
pub const NO_ROWS_MARKER: &str = "(No results: 0 rows returned)";
pub const NO_RECORDS_LEAD: &str = "No records found.";
pub const DEFAULT_DISPLAY_ROWS: usize = 50;

/// Sampling used for narration and conversation.
pub fn default_chat_options() -> ModelOptions {
    ModelOptions {
        temperature: Some(0.7),
        top_p: Some(0.8),
        top_k: Some(20),
        repeat_penalty: Some(1.5),
        num_predict: Some(2048),
    }
}

#[derive(Clone, Debug)]
pub struct Narration {
    pub text: String,
    pub latency: Duration,
}

/// Text handed to the model for a result set: at most `display_rows` rows,
/// always followed by the exact total.
pub fn render_results(result: Option<&ResultSet>, display_rows: usize) -> String {
    let Some(rs) = result.filter(|rs| !rs.is_empty()) else {
        return NO_ROWS_MARKER.to_string();
    };
    let shown = rs.materialized_rows().min(display_rows);
    let total = rs.total_rows();
    let mut text = rs.render_text(shown);
    if total > shown {
        text.push_str(&format!("\n\n... ({total} total rows, showing first {shown})"));
    } else {
        text.push_str(&format!("\n\n({total} rows total)"));
    }
    text
}

/// Turns results (or a conversational message) into streamed, sanitized prose.
pub struct Narrator {
    engine: Arc<dyn LlmEngine>,
    model: String,
    options: ModelOptions,
    display_rows: usize,
}

impl Narrator {
    pub fn new(engine: Arc<dyn LlmEngine>, model: impl Into<String>, options: ModelOptions) -> Self {
        Self {
            engine,
            model: model.into(),
            options,
            display_rows: DEFAULT_DISPLAY_ROWS,
        }
    }

    pub fn with_display_rows(mut self, rows: usize) -> Self {
        self.display_rows = rows;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn narration_prompt(&self, question: &str, result: Option<&ResultSet>) -> String {
        let results = render_results(result, self.display_rows);
        let mut prompt = PromptTemplate::new(NARRATION_PROMPT)
            .render(&[("question", question), ("results", &results)]);
        prompt.push('\n');
        prompt.push_str(NO_THINK);
        prompt
    }

    /// Briefing for `question` grounded on `result`. A missing or empty result
    /// always yields text that says no records were found.
    pub async fn narrate(
        &self,
        question: &str,
        result: Option<&ResultSet>,
        surface: &mut dyn OutputSurface,
    ) -> Result<Narration, LlmError> {
        let req = LlmRequest::user_prompt(
            self.model.clone(),
            self.narration_prompt(question, result),
            self.options.clone(),
        );
        let mut narration = self.stream_sanitized(req, surface).await?;

        let empty = result.map_or(true, ResultSet::is_empty);
        if empty && !narration.text.to_lowercase().contains("no records") {
            narration.text = if narration.text.is_empty() {
                NO_RECORDS_LEAD.to_string()
            } else {
                format!("{NO_RECORDS_LEAD} {}", narration.text)
            };
        }
        surface.render(&narration.text);
        Ok(narration)
    }

    pub fn conversation_prompt(
        &self,
        message: &str,
        history: &[ConversationTurn],
        turns: usize,
        chars_per_turn: usize,
    ) -> String {
        let mut prompt = String::new();
        if !history.is_empty() && turns > 0 {
            let start = history.len().saturating_sub(turns);
            let context = history[start..]
                .iter()
                .map(|t| format!("{}: {}", t.role, truncate_chars(&t.text, chars_per_turn)))
                .collect::<Vec<_>>()
                .join("\n");
            prompt.push_str(&format!("Previous conversation:\n{context}\n\n"));
        }
        prompt.push_str(&format!("Officer's message: {message}\n\nRespond now. {NO_THINK}"));
        prompt
    }

    /// Conversational reply for messages that need no lookup.
    pub async fn converse(
        &self,
        message: &str,
        history: &[ConversationTurn],
        turns: usize,
        chars_per_turn: usize,
        surface: &mut dyn OutputSurface,
    ) -> Result<Narration, LlmError> {
        let req = LlmRequest::user_prompt(
            self.model.clone(),
            self.conversation_prompt(message, history, turns, chars_per_turn),
            self.options.clone(),
        )
        .with_system(GENERAL_SYSTEM_PROMPT);
        let narration = self.stream_sanitized(req, surface).await?;
        surface.render(&narration.text);
        Ok(narration)
    }

    // Every fragment triggers a full re-sanitize of the accumulated text;
    // reasoning markers can straddle fragment boundaries.
    async fn stream_sanitized(
        &self,
        req: LlmRequest,
        surface: &mut dyn OutputSurface,
    ) -> Result<Narration, LlmError> {
        let started = Instant::now();
        let mut stream = self.engine.stream(req).await?;

        let mut accumulated = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            if token.text.is_empty() {
                continue;
            }
            accumulated.push_str(&token.text);
            let cleaned = sanitize(&accumulated);
            if !cleaned.is_empty() {
                surface.render(&cleaned);
            }
        }

        let latency = started.elapsed();
        debug!(model = %self.model, chars = accumulated.len(), latency_ms = latency.as_millis() as u64, "stream finished");
        Ok(Narration {
            text: sanitize(&accumulated),
            latency,
        })
    }
}
