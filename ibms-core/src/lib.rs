use std::sync::Arc;
use std::time::Instant;

use ibms_classifier::{HistoryWindow, IntentClassifier};
use ibms_config::AssistantConfig;
use ibms_infer::LlmEngine;
use ibms_narrator::{Narrator, OutputSurface};
use ibms_policy::SqlPolicy;
use ibms_sqlgen::{extract_sql, SqlGenerator};
use ibms_store::{DataPlane, QueryExecutor};
use ibms_types::{
    truncate_chars, ConversationTurn, ExecutionMeta, PromptTemplate, QueryClass, TemplateError, TurnStage,
};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod outcome;
pub use outcome::{Briefing, Conversation, TurnOutcome, TurnReport};

pub mod session;
pub use session::Session;

/// Suggested questions offered to a new officer.
pub const EXAMPLE_QUESTIONS: [&str; 8] = [
    "How many travelers are in the system?",
    "Which airlines have the highest off-loading rate?",
    "How many watchlist alerts are currently active?",
    "Top 10 most frequent travelers this year",
    "Compare off-loading rates across all airports",
    "List off-loaded passengers at Islamabad Airport in 2025",
    "How many asylum claims were filed this year?",
    "What is IBMS?",
];

#[derive(Clone, Copy, Debug)]
struct Limits {
    error_budget: usize,
    chat_turns: usize,
    chat_chars: usize,
}

/// The assistant: every pipeline stage wired together once and shared by
/// all sessions. Holds no per-session state.
pub struct Assistant {
    classifier: IntentClassifier,
    generator: SqlGenerator,
    policy: SqlPolicy,
    executor: QueryExecutor,
    narrator: Narrator,
    limits: Limits,
}

impl Assistant {
    pub fn new(
        llm_engine: Arc<dyn LlmEngine>,
        data_plane: Arc<dyn DataPlane>,
        cfg: &AssistantConfig,
        sql_template: Arc<PromptTemplate>,
    ) -> Self {
        let pipeline = &cfg.pipeline;
        let policy = SqlPolicy::ibms();
        Self {
            classifier: IntentClassifier::new(
                llm_engine.clone(),
                cfg.llm.chat_model.clone(),
                HistoryWindow {
                    turns: pipeline.classifier_history_turns,
                    chars_per_turn: pipeline.classifier_history_chars,
                },
            ),
            generator: SqlGenerator::new(llm_engine.clone(), cfg.llm.sql_model.clone(), sql_template),
            executor: QueryExecutor::new(data_plane, policy.clone()).with_error_budget(pipeline.error_budget_chars),
            narrator: Narrator::new(llm_engine, cfg.llm.chat_model.clone(), cfg.chat_options())
                .with_display_rows(pipeline.display_rows),
            policy,
            limits: Limits {
                error_budget: pipeline.error_budget_chars,
                chat_turns: pipeline.chat_history_turns,
                chat_chars: pipeline.chat_history_chars,
            },
        }
    }

    /// Builds the assistant with the SQL template named in `cfg`, or the
    /// bundled one. The template is loaded once here.
    pub fn from_config(
        llm_engine: Arc<dyn LlmEngine>,
        data_plane: Arc<dyn DataPlane>,
        cfg: &AssistantConfig,
    ) -> Result<Self, TemplateError> {
        let template = match &cfg.prompts.sql_template {
            Some(path) => PromptTemplate::load(path)?,
            None => SqlGenerator::bundled_template(),
        }
        .require("question")?;
        Ok(Self::new(llm_engine, data_plane, cfg, Arc::new(template)))
    }

    pub fn policy(&self) -> &SqlPolicy {
        &self.policy
    }

    /// Runs one officer message through the pipeline. Never fails: every
    /// fault is a [`TurnOutcome`]. The user turn is always recorded; the
    /// assistant turn only when the turn produced an answer.
    pub async fn handle_turn(
        &self,
        session: &mut Session,
        message: &str,
        surface: &mut dyn OutputSurface,
    ) -> TurnReport {
        let turn_id = Uuid::new_v4();
        let span = info_span!("turn", %turn_id, session_id = %session.id());
        self.run_turn(turn_id, session, message, surface).instrument(span).await
    }

    async fn run_turn(
        &self,
        turn_id: Uuid,
        session: &mut Session,
        message: &str,
        surface: &mut dyn OutputSurface,
    ) -> TurnReport {
        let started = Instant::now();
        enter(surface, TurnStage::Received);

        let class = self.classifier.classify(message, session.turns()).await;
        enter(surface, TurnStage::Classified);
        info!(class = %class, "turn classified");

        let outcome = match class {
            QueryClass::General => self.converse(message, session.turns(), surface).await,
            QueryClass::Database => self.answer_from_data(message, surface, started).await,
        };

        session.append(ConversationTurn::user(message));
        match &outcome {
            TurnOutcome::Conversation(c) => session.append(ConversationTurn::assistant(c.text.clone())),
            TurnOutcome::Briefing(b) => session.append(ConversationTurn {
                result: Some(b.result.clone()),
                meta: Some(ExecutionMeta {
                    sql: b.sql.clone(),
                    row_count: b.row_count(),
                    exec_time: b.exec_time,
                }),
                ..ConversationTurn::assistant(b.narration.clone())
            }),
            _ => {}
        }

        TurnReport {
            turn_id,
            class,
            outcome,
            total: started.elapsed(),
        }
    }

    async fn converse(
        &self,
        message: &str,
        history: &[ConversationTurn],
        surface: &mut dyn OutputSurface,
    ) -> TurnOutcome {
        enter(surface, TurnStage::Narrating);
        match self
            .narrator
            .converse(message, history, self.limits.chat_turns, self.limits.chat_chars, surface)
            .await
        {
            Ok(n) => {
                enter(surface, TurnStage::Done);
                TurnOutcome::Conversation(Conversation {
                    text: n.text,
                    model: self.narrator.model().to_string(),
                    latency: n.latency,
                })
            }
            Err(e) => self.model_fault("Response failed", &e.message),
        }
    }

    async fn answer_from_data(
        &self,
        question: &str,
        surface: &mut dyn OutputSurface,
        started: Instant,
    ) -> TurnOutcome {
        enter(surface, TurnStage::Generating);
        let generation = match self.generator.generate(question).await {
            Ok(g) => g,
            Err(e) => return self.model_fault("SQL generation failed", &e.message),
        };
        enter(surface, TurnStage::Generated);

        let candidate = extract_sql(&generation.raw);
        debug!(sql = %candidate.as_str(), "statement extracted");

        enter(surface, TurnStage::Validating);
        let validated = match self.policy.validate(&candidate) {
            Ok(v) => v,
            Err(rejection) => {
                warn!(reason = %rejection, "statement rejected");
                enter(surface, TurnStage::Rejected);
                return TurnOutcome::Rejected {
                    sql: candidate.as_str().to_string(),
                    reason: rejection.reason,
                };
            }
        };
        enter(surface, TurnStage::Validated);

        enter(surface, TurnStage::Executing);
        let execution = self.executor.execute(&validated).await;
        let sql = validated.as_str().to_string();
        let result = match execution.result {
            Some(rs) if execution.success => rs,
            _ => {
                enter(surface, TurnStage::ExecFailed);
                return TurnOutcome::ExecutionFailed {
                    sql,
                    message: execution.message,
                };
            }
        };
        enter(surface, TurnStage::Executed);

        enter(surface, TurnStage::Narrating);
        let narration = match self.narrator.narrate(question, Some(&result), surface).await {
            Ok(n) => n,
            Err(e) => return self.model_fault("Narration failed", &e.message),
        };
        enter(surface, TurnStage::Done);

        TurnOutcome::Briefing(Briefing {
            sql,
            result,
            narration: narration.text,
            generation_latency: generation.latency,
            exec_time: execution.elapsed,
            narration_latency: narration.latency,
            total: started.elapsed(),
        })
    }

    fn model_fault(&self, what: &str, detail: &str) -> TurnOutcome {
        let message = format!("{what}: {}", truncate_chars(detail, self.limits.error_budget));
        error!(error = %message, "model call failed");
        TurnOutcome::ModelFault { message }
    }
}

fn enter(surface: &mut dyn OutputSurface, stage: TurnStage) {
    debug!(stage = ?stage, "turn stage");
    surface.stage(stage);
}
