//! Terminal results of a pipeline run.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::phases::Phase;
use crate::error::ErrorKind;
use crate::llm::CostUnits;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every keyword finished.
    Success,
    /// At least one keyword finished and at least one failed.
    PartialSuccess,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failed => "failed",
        }
    }

    /// Status from per-keyword counts. A run without keywords succeeds.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::PartialSuccess,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a keyword did not finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordFailure {
    pub keyword_id: String,
    pub term: String,
    pub phase: Phase,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate result of a run, reported on `run:complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub domain_id: String,
    pub keywords_total: usize,
    pub keywords_succeeded: usize,
    pub keywords_failed: usize,
    pub phases_executed: usize,
    pub phases_reused: usize,
    pub phases_degraded: usize,
    /// Executor invocations; retries inside one invocation count once.
    pub external_calls: usize,
    pub phrases_written: usize,
    pub cost: CostUnits,
    /// Which keywords failed, in which phase and why.
    pub failures: Vec<KeywordFailure>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn cost_usd(&self) -> f64 {
        self.cost.usd()
    }
}
