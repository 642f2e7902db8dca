use std::fmt::Write as _;
use std::time::Duration;

use ibms_types::{QueryClass, ResultSet};
use uuid::Uuid;

/// Everything the surrounding application learns about one turn.
#[derive(Clone, Debug)]
pub struct TurnReport {
    pub turn_id: Uuid,
    pub class: QueryClass,
    pub outcome: TurnOutcome,
    pub total: Duration,
}

impl TurnReport {
    /// Officer-facing text for the turn.
    pub fn text(&self) -> String {
        self.outcome.text()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Conversation(_) | TurnOutcome::Briefing(_))
    }
}

#[derive(Clone, Debug)]
pub enum TurnOutcome {
    /// General path: conversational reply, no lookup.
    Conversation(Conversation),
    /// Data path completed: results narrated.
    Briefing(Briefing),
    /// The generated statement failed a security check and was never run.
    Rejected { sql: String, reason: String },
    /// The statement passed validation but the database refused or timed out.
    ExecutionFailed { sql: String, message: String },
    /// A model call failed while generating SQL, narrating or conversing.
    ModelFault { message: String },
}

impl TurnOutcome {
    pub fn text(&self) -> String {
        match self {
            TurnOutcome::Conversation(c) => c.text.clone(),
            TurnOutcome::Briefing(b) => b.narration.clone(),
            TurnOutcome::Rejected { reason, .. } => {
                format!("Query blocked for safety: {reason}\n\nPlease rephrase your question.")
            }
            TurnOutcome::ExecutionFailed { message, .. } => {
                format!("Execution failed: {message}\n\nPlease rephrase.")
            }
            TurnOutcome::ModelFault { message } => message.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Conversation {
    pub text: String,
    pub model: String,
    pub latency: Duration,
}

impl Conversation {
    pub fn details(&self) -> String {
        format!(
            "Mode: General conversation\nModel: {}\nTime: {:.1}s",
            self.model,
            self.latency.as_secs_f64()
        )
    }
}

#[derive(Clone, Debug)]
pub struct Briefing {
    pub sql: String,
    pub result: ResultSet,
    pub narration: String,
    pub generation_latency: Duration,
    pub exec_time: Duration,
    pub narration_latency: Duration,
    pub total: Duration,
}

impl Briefing {
    pub fn row_count(&self) -> usize {
        self.result.total_rows()
    }

    /// The "query details" block shown under a briefing.
    pub fn details(&self) -> String {
        let mut out = String::from("Mode: Database query (NL2SQL)\n");
        let _ = writeln!(out, "Generated SQL:\n{}", self.sql);
        let _ = writeln!(
            out,
            "Execution: {} rows in {:.2}s",
            self.row_count(),
            self.exec_time.as_secs_f64()
        );
        let _ = write!(
            out,
            "Timings: SQL Gen: {:.1}s | Exec: {:.2}s | Narration: {:.1}s | Total: {:.1}s",
            self.generation_latency.as_secs_f64(),
            self.exec_time.as_secs_f64(),
            self.narration_latency.as_secs_f64(),
            self.total.as_secs_f64()
        );
        out
    }

    /// Result table capped at `display_rows`, with a note when rows were left out.
    pub fn table(&self, display_rows: usize) -> String {
        let total = self.row_count();
        let shown = self.result.materialized_rows().min(display_rows);
        let header = if total > shown {
            format!("Results ({total} rows, showing first {shown})")
        } else {
            format!("Results ({total} rows)")
        };
        format!("{header}\n{}", self.result.render_text(shown))
    }
}
