//! Database schema constants.
//!
//! SQLite dialect. Timestamps are RFC 3339 text; lease expiry is stored as
//! epoch milliseconds so it can be compared in SQL.

/// Domains supplied by the upstream collaborator.
pub const CREATE_DOMAINS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS domains (
    id          TEXT PRIMARY KEY,
    context     TEXT NOT NULL,
    locale      TEXT,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
"#;

/// Keywords supplied by the upstream collaborator.
pub const CREATE_KEYWORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS keywords (
    id          TEXT PRIMARY KEY,
    domain_id   TEXT NOT NULL REFERENCES domains(id) ON DELETE CASCADE,
    term        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)
"#;

/// One row per (scope, phase).
pub const CREATE_PHASE_EXECUTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS phase_executions (
    scope_id          TEXT    NOT NULL,
    phase             TEXT    NOT NULL,
    phase_order       INTEGER NOT NULL,
    scope_kind        TEXT    NOT NULL,
    domain_id         TEXT    NOT NULL,
    status            TEXT    NOT NULL DEFAULT 'pending',
    progress          INTEGER NOT NULL DEFAULT 0,
    result            TEXT,
    degraded          INTEGER NOT NULL DEFAULT 0,
    error             TEXT,
    input_fingerprint TEXT,
    started_at        TEXT,
    ended_at          TEXT,
    updated_at        TEXT    NOT NULL,

    PRIMARY KEY (scope_id, phase)
)
"#;

/// Final phrases per keyword, replaced as a set.
pub const CREATE_GENERATED_PHRASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generated_phrases (
    keyword_id        TEXT    NOT NULL,
    position          INTEGER NOT NULL,
    text              TEXT    NOT NULL,
    intent_label      TEXT    NOT NULL,
    intent_confidence REAL    NOT NULL,
    relevance_score   INTEGER NOT NULL,
    source_tags       TEXT    NOT NULL DEFAULT '[]',
    trend_label       TEXT    NOT NULL DEFAULT '',
    low_confidence    INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),

    PRIMARY KEY (keyword_id, position)
)
"#;

/// Per-domain run lock with expiry.
pub const CREATE_RUN_LEASES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS run_leases (
    domain_id      TEXT    PRIMARY KEY,
    holder         TEXT    NOT NULL,
    acquired_at_ms INTEGER NOT NULL,
    expires_at_ms  INTEGER NOT NULL
)
"#;

pub const CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_keywords_domain ON keywords(domain_id);
CREATE INDEX IF NOT EXISTS idx_phase_executions_domain ON phase_executions(domain_id, scope_kind);
CREATE INDEX IF NOT EXISTS idx_phase_executions_status ON phase_executions(status)
"#;

/// Returns all schema statements in order of execution.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_DOMAINS_TABLE,
        CREATE_KEYWORDS_TABLE,
        CREATE_PHASE_EXECUTIONS_TABLE,
        CREATE_GENERATED_PHRASES_TABLE,
        CREATE_RUN_LEASES_TABLE,
        CREATE_INDEXES,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const DOMAINS: &str = "domains";
    pub const KEYWORDS: &str = "keywords";
    pub const PHASE_EXECUTIONS: &str = "phase_executions";
    pub const GENERATED_PHRASES: &str = "generated_phrases";
    pub const RUN_LEASES: &str = "run_leases";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 6);
        assert!(statements[0].contains(tables::DOMAINS));
        assert!(statements[2].contains("PRIMARY KEY (scope_id, phase)"));
        assert!(statements[4].contains(tables::RUN_LEASES));
    }
}
