//! Records read and written by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::phases::Phase;

/// Unit of analysis: a website/business. Created upstream, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    /// Crawled or operator-supplied description of the domain.
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Seed term belonging to a domain. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub domain_id: String,
    pub term: String,
}

/// Whether a phase runs once per domain or once per keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Domain,
    Keyword,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Domain => "domain",
            ScopeKind::Keyword => "keyword",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(ScopeKind::Domain),
            "keyword" => Ok(ScopeKind::Keyword),
            other => Err(format!("unknown scope kind '{}'", other)),
        }
    }
}

/// Identifies the domain or keyword a phase execution belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    pub id: String,
    /// Owning domain; equal to `id` for domain scopes.
    pub domain_id: String,
}

impl Scope {
    pub fn domain(domain_id: impl Into<String>) -> Self {
        let id = domain_id.into();
        Self {
            kind: ScopeKind::Domain,
            domain_id: id.clone(),
            id,
        }
    }

    pub fn keyword(keyword: &Keyword) -> Self {
        Self {
            kind: ScopeKind::Keyword,
            id: keyword.id.clone(),
            domain_id: keyword.domain_id.clone(),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Lifecycle of one (scope, phase) checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Failed)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhaseStatus::Pending),
            "running" => Ok(PhaseStatus::Running),
            "completed" => Ok(PhaseStatus::Completed),
            "failed" => Ok(PhaseStatus::Failed),
            other => Err(format!("unknown phase status '{}'", other)),
        }
    }
}

/// Persisted state of one phase for one scope. Exactly one row exists per
/// `(scope_id, phase)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub scope_id: String,
    pub scope_kind: ScopeKind,
    pub domain_id: String,
    pub phase: Phase,
    pub status: PhaseStatus,
    /// 0-100, non-decreasing while running.
    pub progress: u8,
    pub result: Option<Value>,
    /// Result came from the repair parser's fallback path.
    pub degraded: bool,
    pub error: Option<String>,
    /// SHA-256 of the rendered context the phase ran with.
    pub input_fingerprint: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseExecution {
    pub fn is_completed(&self) -> bool {
        self.status == PhaseStatus::Completed
    }
}

/// New state written by [`CheckpointStore::put`](crate::storage::CheckpointStore::put).
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointUpdate {
    pub status: PhaseStatus,
    pub progress: u8,
    pub result: Option<Value>,
    pub degraded: bool,
    pub error: Option<String>,
    pub input_fingerprint: Option<String>,
}

impl CheckpointUpdate {
    pub fn running(progress: u8) -> Self {
        Self {
            status: PhaseStatus::Running,
            progress: progress.min(100),
            result: None,
            degraded: false,
            error: None,
            input_fingerprint: None,
        }
    }

    pub fn completed(result: Value, degraded: bool) -> Self {
        Self {
            status: PhaseStatus::Completed,
            progress: 100,
            result: Some(result),
            degraded,
            error: None,
            input_fingerprint: None,
        }
    }

    pub fn failed(progress: u8, error: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Failed,
            progress: progress.min(100),
            result: None,
            degraded: false,
            error: Some(error.into()),
            input_fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.input_fingerprint = Some(fingerprint.into());
        self
    }
}

/// Final, scored phrase produced for a keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedPhrase {
    pub keyword_id: String,
    /// Order in which the phrase was generated, starting at 0.
    pub position: u32,
    pub text: String,
    pub intent_label: String,
    /// 0.0 - 1.0
    pub intent_confidence: f64,
    /// 0 - 100
    pub relevance_score: u8,
    pub source_tags: Vec<String>,
    pub trend_label: String,
    /// Set when an input was degraded or intent/score had to be defaulted.
    pub low_confidence: bool,
}
