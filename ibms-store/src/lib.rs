use async_trait::async_trait;
use ibms_policy::ValidatedSql;
use ibms_types::ResultSet;
use thiserror::Error;

pub mod executor;
pub use executor::{ExecutionOutcome, QueryExecutor, DEFAULT_ERROR_BUDGET};

pub mod sqlite;
pub use sqlite::{SqliteConfig, SqliteDataPlane};

#[derive(Debug, Error)]
#[error("{message}")]
pub struct DataError {
    pub message: String,
}

impl DataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(e: rusqlite::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// The database boundary: runs one read-only statement and returns its rows.
///
/// Only [`ValidatedSql`] is accepted, so nothing reaches an implementation
/// without having passed the SQL policy.
#[async_trait]
pub trait DataPlane: Send + Sync {
    async fn query(&self, sql: &ValidatedSql) -> Result<ResultSet, DataError>;
}
