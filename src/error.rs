//! Error types for keyword-forge operations.
//!
//! Defines the error types for each subsystem:
//! - LLM backend interactions
//! - External task execution (retry classification)
//! - Checkpoint persistence
//! - Pipeline runs, with a machine-readable [`ErrorKind`]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::llm::CostUnits;

/// Errors that can occur during LLM backend operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENROUTER_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Backend returned no content")]
    EmptyResponse,
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    ///
    /// Timeouts, connection failures, rate limits, 408/429 and 5xx responses
    /// are transient. Authentication, validation and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout(_) | LlmError::Connection(_) | LlmError::RateLimited(_) => true,
            LlmError::RequestFailed(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("temporarily")
            }
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 429 || *code == 408,
            LlmError::MissingApiKey | LlmError::ParseError(_) | LlmError::EmptyResponse => false,
        }
    }
}

/// Errors returned by the external task executor after its retry policy ran.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    /// Retries exhausted on a transient failure. `cost` covers every attempt.
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient {
        attempts: u32,
        message: String,
        cost: CostUnits,
    },

    /// Non-retryable failure.
    #[error("permanent failure on attempt {attempts}: {message}")]
    Permanent {
        attempts: u32,
        message: String,
        cost: CostUnits,
    },

    /// The caller cancelled the call while it was in flight.
    #[error("cancelled")]
    Cancelled,
}

/// Errors raised by the checkpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Machine-readable classification carried on terminal error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientExternal,
    PermanentExternal,
    MalformedResponse,
    Persistence,
    ConcurrentRunConflict,
    NotFound,
    Cancelled,
    AllKeywordsFailed,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::PermanentExternal => "permanent_external",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Persistence => "persistence",
            ErrorKind::ConcurrentRunConflict => "concurrent_run_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::AllKeywordsFailed => "all_keywords_failed",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that terminate a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("External backend unavailable: {0}")]
    TransientExternal(String),

    #[error("External backend rejected the task: {0}")]
    PermanentExternal(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Domain '{domain_id}' already has a run in progress (lease held by {holder})")]
    ConcurrentRunConflict { domain_id: String, holder: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("All {count} keyword(s) failed")]
    AllKeywordsFailed { count: usize },

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::TransientExternal(_) => ErrorKind::TransientExternal,
            PipelineError::PermanentExternal(_) => ErrorKind::PermanentExternal,
            PipelineError::Persistence(_) => ErrorKind::Persistence,
            PipelineError::ConcurrentRunConflict { .. } => ErrorKind::ConcurrentRunConflict,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
            PipelineError::AllKeywordsFailed { .. } => ErrorKind::AllKeywordsFailed,
            PipelineError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

impl From<ExecutorError> for PipelineError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Transient { .. } => PipelineError::TransientExternal(err.to_string()),
            ExecutorError::Permanent { .. } => PipelineError::PermanentExternal(err.to_string()),
            ExecutorError::Cancelled => PipelineError::Cancelled("external call aborted".into()),
        }
    }
}

impl ExecutorError {
    /// What the failed call consumed before giving up.
    pub fn cost(&self) -> CostUnits {
        match self {
            ExecutorError::Transient { cost, .. } | ExecutorError::Permanent { cost, .. } => *cost,
            ExecutorError::Cancelled => CostUnits::default(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Transient { .. } => ErrorKind::TransientExternal,
            ExecutorError::Permanent { .. } => ErrorKind::PermanentExternal,
            ExecutorError::Cancelled => ErrorKind::Cancelled,
        }
    }
}
