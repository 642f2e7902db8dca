use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("cannot read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("prompt template has no {{{0}}} placeholder")]
    MissingPlaceholder(String),
}

/// Prompt text with `{name}` substitution points.
///
/// Rendering is a single left-to-right pass, so a substituted value that itself
/// contains `{name}` is never expanded again. Braces that do not name a
/// supplied variable are copied through untouched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { text })
    }

    /// Fail unless the template contains `{key}`.
    pub fn require(self, key: &str) -> Result<Self, TemplateError> {
        if self.text.contains(&format!("{{{key}}}")) {
            Ok(self)
        } else {
            Err(TemplateError::MissingPlaceholder(key.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn render(&self, vars: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let key = &after[..close];
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| (*v, close))
            });
            match value {
                Some((v, close)) => {
                    out.push_str(v);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_placeholders_once() {
        let t = PromptTemplate::new("Q: {question}\nR: {results}");
        let out = t.render(&[("question", "what is {results}?"), ("results", "42")]);
        assert_eq!(out, "Q: what is {results}?\nR: 42");
    }

    #[test]
    fn leaves_unknown_braces_alone() {
        let t = PromptTemplate::new("json {\"a\": 1} and {question}");
        assert_eq!(t.render(&[("question", "x")]), "json {\"a\": 1} and x");
    }

    #[test]
    fn require_detects_missing_placeholder() {
        let err = PromptTemplate::new("no slot here").require("question").unwrap_err();
        assert!(matches!(err, TemplateError::MissingPlaceholder(k) if k == "question"));
        assert!(PromptTemplate::new("{question}").require("question").is_ok());
    }

    #[test]
    fn load_reports_path_on_error() {
        let err = PromptTemplate::load("/nonexistent/ibms/template.txt").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ibms/template.txt"));
    }
}
