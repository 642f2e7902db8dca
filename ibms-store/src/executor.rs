use std::sync::Arc;
use std::time::{Duration, Instant};

use ibms_policy::{PolicyDecision, SqlPolicy, ValidatedSql};
use ibms_types::{truncate_chars, ResultSet};
use tracing::{info, warn};

use crate::DataPlane;

/// Characters of backend error text that may reach the officer.
pub const DEFAULT_ERROR_BUDGET: usize = 200;

#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: Option<ResultSet>,
    pub message: String,
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    fn failed(message: String, elapsed: Duration) -> Self {
        Self {
            success: false,
            result: None,
            message,
            elapsed,
        }
    }
}

/// Runs validated statements and turns every failure into a bounded message.
pub struct QueryExecutor {
    plane: Arc<dyn DataPlane>,
    policy: SqlPolicy,
    error_budget: usize,
}

impl QueryExecutor {
    pub fn new(plane: Arc<dyn DataPlane>, policy: SqlPolicy) -> Self {
        Self {
            plane,
            policy,
            error_budget: DEFAULT_ERROR_BUDGET,
        }
    }

    pub fn with_error_budget(mut self, chars: usize) -> Self {
        self.error_budget = chars;
        self
    }

    /// Never returns an error: faults come back as an unsuccessful outcome.
    pub async fn execute(&self, sql: &ValidatedSql) -> ExecutionOutcome {
        // The statement is checked again here; callers are not trusted to have done it.
        if let PolicyDecision::Deny(rejection) = self.policy.check(sql.as_str()) {
            warn!(reason = %rejection, "statement failed re-validation");
            return ExecutionOutcome::failed(format!("Validation failed: {rejection}"), Duration::ZERO);
        }

        let started = Instant::now();
        match self.plane.query(sql).await {
            Ok(rs) => {
                let elapsed = started.elapsed();
                let rows = rs.total_rows();
                info!(rows, elapsed_ms = elapsed.as_millis() as u64, "query executed");
                ExecutionOutcome {
                    success: true,
                    result: Some(rs),
                    message: format!("{rows} rows"),
                    elapsed,
                }
            }
            Err(e) => {
                let message = format!("Error: {}", truncate_chars(&e.message, self.error_budget));
                warn!(error = %message, "query failed");
                ExecutionOutcome::failed(message, started.elapsed())
            }
        }
    }
}
