use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ibms_store::SqliteConfig;
use ibms_types::ModelOptions;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Full assistant configuration. Every field has a default, so an empty
/// document is a valid configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub prompts: PromptsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Coder model used for SQL generation.
    pub sql_model: String,
    /// Reasoning model used for classification, narration and conversation.
    pub chat_model: String,
    pub request_timeout_secs: u64,
    pub chat_options: ChatOptions,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            sql_model: "qwen2.5-coder:14b".into(),
            chat_model: "qwen3-14b-fixed:latest".into(),
            request_timeout_secs: 120,
            chat_options: ChatOptions::default(),
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub num_predict: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            top_k: 20,
            repeat_penalty: 1.5,
            num_predict: 2048,
        }
    }
}

impl From<&ChatOptions> for ModelOptions {
    fn from(o: &ChatOptions) -> Self {
        ModelOptions {
            temperature: Some(o.temperature),
            top_p: Some(o.top_p),
            top_k: Some(o.top_k),
            repeat_penalty: Some(o.repeat_penalty),
            num_predict: Some(o.num_predict),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: u32,
    pub query_timeout_secs: u64,
    pub max_materialized_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ibms.sqlite"),
            pool_size: 3,
            query_timeout_secs: 30,
            max_materialized_rows: 10_000,
        }
    }
}

impl From<&DatabaseConfig> for SqliteConfig {
    fn from(db: &DatabaseConfig) -> Self {
        SqliteConfig {
            path: db.path.clone(),
            pool_size: db.pool_size,
            query_timeout: Duration::from_secs(db.query_timeout_secs),
            max_materialized_rows: db.max_materialized_rows,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptsConfig {
    /// SQL generation template; the bundled one is used when unset.
    pub sql_template: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub display_rows: usize,
    pub error_budget_chars: usize,
    pub classifier_history_turns: usize,
    pub classifier_history_chars: usize,
    pub chat_history_turns: usize,
    pub chat_history_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            display_rows: 50,
            error_budget_chars: 200,
            classifier_history_turns: 4,
            classifier_history_chars: 150,
            chat_history_turns: 10,
            chat_history_chars: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

impl AssistantConfig {
    pub fn from_yaml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Reads `path` when given (defaults otherwise), then applies the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_path(p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("IBMS_LLM_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("IBMS_SQL_MODEL") {
            self.llm.sql_model = v;
        }
        if let Some(v) = get("IBMS_CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Some(v) = get("IBMS_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = get("IBMS_SQL_TEMPLATE") {
            self.prompts.sql_template = Some(PathBuf::from(v));
        }
        if let Some(v) = get("IBMS_LOG") {
            self.logging.level = v;
        }
    }

    pub fn sqlite(&self) -> SqliteConfig {
        SqliteConfig::from(&self.database)
    }

    pub fn chat_options(&self) -> ModelOptions {
        ModelOptions::from(&self.llm.chat_options)
    }
}
