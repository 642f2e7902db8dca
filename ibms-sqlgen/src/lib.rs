use std::sync::Arc;
use std::time::{Duration, Instant};

use ibms_infer::{LlmEngine, LlmError};
use ibms_types::{LlmRequest, ModelOptions, PromptTemplate};
use tracing::debug;

pub mod extract;
pub use extract::extract_sql;

/// Template shipped with the crate, used when no template file is configured.
pub const BUNDLED_SQL_TEMPLATE: &str = include_str!("../prompts/sql_prompt.txt");

pub const SQL_MAX_TOKENS: u32 = 1024;

/// Raw model output for one question. Untrusted until extracted and validated.
#[derive(Clone, Debug)]
pub struct Generation {
    pub raw: String,
    pub latency: Duration,
}

/// Renders a question into the SQL prompt and asks the coder model for a query.
/// Purely generative: no validation, no execution.
pub struct SqlGenerator {
    engine: Arc<dyn LlmEngine>,
    model: String,
    template: Arc<PromptTemplate>,
}

impl SqlGenerator {
    pub fn new(engine: Arc<dyn LlmEngine>, model: impl Into<String>, template: Arc<PromptTemplate>) -> Self {
        Self {
            engine,
            model: model.into(),
            template,
        }
    }

    pub fn bundled_template() -> PromptTemplate {
        PromptTemplate::new(BUNDLED_SQL_TEMPLATE)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn render_prompt(&self, question: &str) -> String {
        self.template.render(&[("question", question)])
    }

    pub async fn generate(&self, question: &str) -> Result<Generation, LlmError> {
        let req = LlmRequest::user_prompt(
            self.model.clone(),
            self.render_prompt(question),
            ModelOptions::deterministic(SQL_MAX_TOKENS),
        );
        let started = Instant::now();
        let raw = self.engine.complete(req).await?;
        let latency = started.elapsed();
        debug!(model = %self.model, latency_ms = latency.as_millis() as u64, "sql generated");
        Ok(Generation { raw, latency })
    }
}
