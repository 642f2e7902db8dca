//! Read-only SQL policy.
//!
//! The gate every generated statement passes before it may run: one
//! statement, read-only entry keyword, no blocked construct, no comments,
//! and at least one reference to a known IBMS table. It is a layered
//! deny-list plus allow-list over the statement text, not a parser.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// The 20 tables of the IBMS schema.
pub const IBMS_TABLES: [&str; 20] = [
    "countries",
    "ports_of_entry",
    "visa_categories",
    "sponsors",
    "travelers",
    "document_registry",
    "visa_applications",
    "travel_records",
    "asylum_claims",
    "removal_orders",
    "detention_records",
    "family_relationships",
    "watchlist",
    "ecl_entries",
    "trafficking_cases",
    "illegal_crossings",
    "offloading_records",
    "risk_profiles",
    "suspect_networks",
    "audit_log",
];

/// Constructs that must never execute, matched case-insensitively anywhere in
/// the statement. Checked in order; the first match names the rejection.
pub const BLOCKED_PATTERNS: &[&str] = &[
    // DML / DDL
    r"\bINSERT\b",
    r"\bUPDATE\b",
    r"\bDELETE\b",
    r"\bMERGE\b",
    r"\bREPLACE\s+INTO\b",
    r"\bCREATE\b",
    r"\bDROP\b",
    r"\bALTER\b",
    r"\bTRUNCATE\b",
    r"\bRENAME\b",
    // privileges
    r"\bGRANT\b",
    r"\bREVOKE\b",
    // privileged packages, dictionary views
    r"\bDBMS_",
    r"\bUTL_",
    r"\bSYS\.",
    r"\bDBA_",
    r"\bG?V\$",
    r"\bsqlite_",
    // dynamic execution
    r"\bEXECUTE\s+IMMEDIATE\b",
    r"\bEXEC\b",
    r"\bCALL\b",
    r"\bload_extension\b",
    // procedural blocks
    r"\bBEGIN\b",
    r"\bDECLARE\b",
    // engine and session control
    r"\bATTACH\b",
    r"\bDETACH\b",
    r"\bPRAGMA\b",
    // pragmas exposed as table-valued functions
    r"\bpragma_\w*",
    r"\bVACUUM\b",
    r"\bREINDEX\b",
    r"\bLOCK\s+TABLE\b",
];

fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:SELECT|WITH)\b").expect("valid regex"))
}

fn blocked_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        BLOCKED_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("valid blocked pattern"))
            .collect()
    })
}

fn string_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'(?:[^']|'')*'").expect("valid regex"))
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z_][a-z0-9_$#]*").expect("valid regex"))
}

/// Which check rejected a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Check {
    Empty,
    EntryKeyword,
    StatementTerminator,
    BlockedKeyword,
    Comment,
    UnknownTables,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub check: Check,
    pub reason: String,
}

impl Rejection {
    fn new(check: Check, reason: impl Into<String>) -> Self {
        Self {
            check,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(Rejection),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }

    pub fn reason(&self) -> &str {
        match self {
            PolicyDecision::Allow => "OK",
            PolicyDecision::Deny(r) => &r.reason,
        }
    }
}

/// A single statement isolated from model output. Still untrusted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateSql(String);

impl CandidateSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A statement that passed [`SqlPolicy::validate`]. Only this crate can build one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The global read-only policy. Pure: no I/O, no state beyond its allow-list.
#[derive(Clone, Debug)]
pub struct SqlPolicy {
    tables: BTreeSet<String>,
}

impl Default for SqlPolicy {
    fn default() -> Self {
        Self::ibms()
    }
}

impl SqlPolicy {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn ibms() -> Self {
        Self::new(IBMS_TABLES)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    /// Run every check in order, stopping at the first failure.
    pub fn check(&self, sql: &str) -> PolicyDecision {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return deny(Check::Empty, "Empty SQL");
        }
        if !entry_regex().is_match(trimmed) {
            return deny(
                Check::EntryKeyword,
                format!("Must start with SELECT/WITH, found {}", leading_word(trimmed)),
            );
        }
        if sql.contains(';') {
            return deny(Check::StatementTerminator, "Multiple statements detected");
        }
        for re in blocked_regexes() {
            if let Some(m) = re.find(sql) {
                return deny(Check::BlockedKeyword, format!("Blocked: {}", m.as_str()));
            }
        }
        if sql.contains("--") || sql.contains("/*") {
            return deny(Check::Comment, "SQL comments not allowed");
        }
        if !self.references_known_table(sql) {
            return deny(Check::UnknownTables, "No known IBMS table referenced");
        }
        PolicyDecision::Allow
    }

    /// Promote a candidate to a [`ValidatedSql`] if every check passes.
    pub fn validate(&self, candidate: &CandidateSql) -> Result<ValidatedSql, Rejection> {
        match self.check(candidate.as_str()) {
            PolicyDecision::Allow => Ok(ValidatedSql(candidate.as_str().trim().to_string())),
            PolicyDecision::Deny(rejection) => Err(rejection),
        }
    }

    // Identifier-boundary match with string literals blanked out, so a table
    // name inside a quoted value or a longer identifier does not count.
    fn references_known_table(&self, sql: &str) -> bool {
        let lowered = sql.to_lowercase();
        let without_literals = string_literal_regex().replace_all(&lowered, "''");
        identifier_regex()
            .find_iter(&without_literals)
            .any(|m| self.tables.contains(m.as_str()))
    }
}

// First whitespace-delimited word, capped so the reason stays short.
fn leading_word(sql: &str) -> &str {
    let word = sql.split_whitespace().next().unwrap_or_default();
    match word.char_indices().nth(32) {
        Some((idx, _)) => &word[..idx],
        None => word,
    }
}

fn deny(check: Check, reason: impl Into<String>) -> PolicyDecision {
    PolicyDecision::Deny(Rejection::new(check, reason))
}

/// Check `sql` against the default IBMS policy.
pub fn validate_sql(sql: &str) -> PolicyDecision {
    static POLICY: OnceLock<SqlPolicy> = OnceLock::new();
    POLICY.get_or_init(SqlPolicy::ibms).check(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(sql: &str) -> Option<Check> {
        match validate_sql(sql) {
            PolicyDecision::Allow => None,
            PolicyDecision::Deny(r) => Some(r.check),
        }
    }

    #[test]
    fn statement_table() {
        use Check::*;
        let table: &[(&str, Option<Check>)] = &[
            ("SELECT COUNT(*) FROM travelers", None),
            ("  select count(*) from TRAVELERS  ", None),
            ("WITH t AS (SELECT * FROM watchlist) SELECT COUNT(*) FROM t", None),
            ("SELECT a.name FROM ibms_user.asylum_claims a", None),
            ("SELECT created_at, last_updated FROM audit_log", None),
            ("SELECT * FROM travel_records WHERE status = 'is_deleted'", None),
            ("", Some(Empty)),
            ("   \n\t", Some(Empty)),
            ("travelers;", Some(EntryKeyword)),
            ("DELETE FROM travelers", Some(EntryKeyword)),
            ("EXPLAIN SELECT * FROM travelers", Some(EntryKeyword)),
            ("SELECTED FROM travelers", Some(EntryKeyword)),
            ("(SELECT 1 FROM travelers)", Some(EntryKeyword)),
            ("SELECT 1; SELECT 2", Some(StatementTerminator)),
            ("SELECT * FROM travelers;", Some(StatementTerminator)),
            ("SELECT * FROM travelers; DROP TABLE travelers", Some(StatementTerminator)),
            ("SELECT * FROM travelers WHERE id IN (DELETE FROM x)", Some(BlockedKeyword)),
            ("WITH d AS (UPDATE travelers SET x = 1) SELECT 1 FROM travelers", Some(BlockedKeyword)),
            ("SELECT * FROM travelers FOR UPDATE", Some(BlockedKeyword)),
            ("SELECT insert FROM travelers", Some(BlockedKeyword)),
            ("SELECT * FROM dba_users", Some(BlockedKeyword)),
            ("SELECT * FROM v$session", Some(BlockedKeyword)),
            ("SELECT * FROM gv$instance", Some(BlockedKeyword)),
            ("SELECT * FROM sys.user$", Some(BlockedKeyword)),
            ("SELECT dbms_random.value FROM travelers", Some(BlockedKeyword)),
            ("SELECT utl_http.request('x') FROM travelers", Some(BlockedKeyword)),
            ("SELECT name FROM sqlite_master", Some(BlockedKeyword)),
            ("SELECT load_extension('x') FROM travelers", Some(BlockedKeyword)),
            ("SELECT 1 FROM travelers WHERE EXECUTE IMMEDIATE 'x'", Some(BlockedKeyword)),
            ("SELECT 1 FROM travelers BEGIN NULL END", Some(BlockedKeyword)),
            ("WITH x AS (SELECT 1) DECLARE v NUMBER", Some(BlockedKeyword)),
            ("SELECT exec FROM travelers", Some(BlockedKeyword)),
            ("SELECT * FROM travelers WHERE 1=1 -- comment", Some(Comment)),
            ("SELECT * FROM travelers /* hidden */", Some(Comment)),
            ("SELECT 1 FROM dual", Some(UnknownTables)),
            ("SELECT 'travelers' FROM dual", Some(UnknownTables)),
            ("SELECT * FROM travelers_archive", Some(UnknownTables)),
            ("SELECT name, type FROM pragma_table_info('watchlist'), travelers LIMIT 1", Some(BlockedKeyword)),
            ("SELECT file FROM pragma_database_list, travelers", Some(BlockedKeyword)),
            (
                "SELECT traveler_id, 1, 2, 3 FROM travelers UNION ALL SELECT name, 1, 2, 3 FROM pragma_table_list",
                Some(BlockedKeyword),
            ),
            ("SELECT * FROM travelers, PRAGMA_INDEX_LIST('travelers')", Some(BlockedKeyword)),
        ];
        for (sql, expected) in table {
            assert_eq!(verdict(sql), *expected, "statement: {sql:?}");
        }
    }

    #[test]
    fn blocked_reason_names_keyword() {
        let decision = validate_sql("SELECT * FROM travelers WHERE x IN (DELETE FROM y)");
        assert_eq!(decision.reason(), "Blocked: DELETE");
        assert!(!decision.is_allowed());
    }

    #[test]
    fn pragma_functions_name_the_function() {
        let decision = validate_sql("SELECT file FROM pragma_database_list, travelers");
        assert_eq!(decision.reason(), "Blocked: pragma_database_list");
    }

    #[test]
    fn entry_reason_names_leading_word() {
        let decision = validate_sql("DELETE FROM travelers");
        assert_eq!(decision.reason(), "Must start with SELECT/WITH, found DELETE");

        let long = format!("{} FROM travelers", "x".repeat(80));
        let reason = validate_sql(&long).reason().to_string();
        assert!(reason.ends_with(&"x".repeat(32)));
        assert!(!reason.contains(&"x".repeat(33)));
    }

    #[test]
    fn every_mutating_verb_is_rejected() {
        for verb in ["insert", "update", "delete", "merge", "create", "drop", "alter", "truncate", "rename", "grant", "revoke"] {
            for cased in [verb.to_string(), verb.to_uppercase()] {
                let sql = format!("SELECT * FROM travelers WHERE note = {cased}");
                assert!(!validate_sql(&sql).is_allowed(), "{sql}");
                let sql = format!("{cased} travelers");
                assert!(!validate_sql(&sql).is_allowed(), "{sql}");
            }
        }
    }

    #[test]
    fn comment_markers_always_rejected() {
        for sql in [
            "SELECT * FROM travelers -- x",
            "SELECT * FROM travelers /* x */",
            "-- SELECT * FROM travelers",
            "DELETE FROM travelers /* x */",
        ] {
            assert!(!validate_sql(sql).is_allowed(), "{sql}");
        }
    }

    #[test]
    fn validate_produces_trimmed_statement() {
        let policy = SqlPolicy::ibms();
        let ok = policy
            .validate(&CandidateSql::new("  SELECT COUNT(*) FROM travelers \n"))
            .unwrap();
        assert_eq!(ok.as_str(), "SELECT COUNT(*) FROM travelers");

        let err = policy.validate(&CandidateSql::new("DROP TABLE travelers")).unwrap_err();
        assert_eq!(err.check, Check::EntryKeyword);
    }

    #[test]
    fn custom_allow_list() {
        let policy = SqlPolicy::new(["Orders"]);
        assert!(policy.check("SELECT * FROM orders").is_allowed());
        assert!(!policy.check("SELECT * FROM travelers").is_allowed());
        assert_eq!(policy.tables().collect::<Vec<_>>(), vec!["orders"]);
    }

    #[test]
    fn check_is_pure() {
        let sql = "SELECT COUNT(*) FROM watchlist";
        assert_eq!(validate_sql(sql), validate_sql(sql));
    }
}
