use std::sync::OnceLock;

use ibms_policy::CandidateSql;
use regex::Regex;

fn fenced_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:sql)?\s*\n?(.*?)\n?```").expect("valid regex"))
}

fn select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)\bSELECT\b.*").expect("valid regex"))
}

/// Isolate one SQL statement from free-form model output.
///
/// Preference order: the first fenced code block, else everything from the
/// first `SELECT`, else the whole text. The result is cut at the first `;`,
/// so at most one statement is ever handed on.
pub fn extract_sql(raw: &str) -> CandidateSql {
    let raw = raw.trim();
    let sql = if let Some(caps) = fenced_regex().captures(raw) {
        caps.get(1).map_or("", |m| m.as_str())
    } else if let Some(m) = select_regex().find(raw) {
        m.as_str()
    } else {
        raw
    };
    let sql = match sql.find(';') {
        Some(idx) => &sql[..idx],
        None => sql,
    };
    CandidateSql::new(sql.trim())
}
