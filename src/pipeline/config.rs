//! Pipeline configuration for the coordinator.
//!
//! This module provides configuration options for the keyword research
//! pipeline, including concurrency limits, per-phase timeouts, retry policy,
//! backend models, run leases and storage location.

use std::time::Duration;
use thiserror::Error;

use crate::context::DEFAULT_MAX_CONTEXT_CHARS;
use crate::executor::RetryPolicy;
use crate::progress::DisconnectPolicy;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline coordinator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Execution settings
    /// Maximum number of keywords processed concurrently.
    pub max_concurrent_keywords: usize,
    /// Timeout for a single executor attempt.
    pub phase_timeout: Duration,
    /// Retry policy applied by the executor.
    pub retry: RetryPolicy,

    // LLM settings
    /// Model for generation-backed phases.
    pub generation_model: String,
    /// Online model for search-backed phases.
    pub search_model: String,
    /// Temperature for LLM generation.
    pub temperature: f64,
    /// Max output tokens per request.
    pub max_tokens: u32,
    /// Phrases requested per keyword.
    pub phrases_per_keyword: usize,

    // Run settings
    /// Lifetime of the per-domain run lease between heartbeats.
    pub lease_ttl: Duration,
    /// What to do when the progress receiver goes away.
    pub disconnect_policy: DisconnectPolicy,
    /// Capacity of the progress channel.
    pub event_buffer: usize,
    /// Cap on domain description characters carried into prompts.
    pub max_context_chars: usize,

    // Storage settings
    /// SQLite database URL.
    pub database_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Execution defaults
            max_concurrent_keywords: 3,
            phase_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),

            // LLM defaults
            generation_model: "openai/gpt-4o-mini".to_string(),
            search_model: "perplexity/sonar".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            phrases_per_keyword: 25,

            // Run defaults
            lease_ttl: Duration::from_secs(600), // 10 minutes
            disconnect_policy: DisconnectPolicy::Detach,
            event_buffer: 256,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,

            // Storage defaults
            database_url: "sqlite://keyword_forge.db".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_MAX_CONCURRENT_KEYWORDS`: Concurrent keywords (default: 3)
    /// - `PIPELINE_PHASE_TIMEOUT_SECS`: Per-attempt timeout (default: 120)
    /// - `PIPELINE_MAX_ATTEMPTS`: Executor attempts per phase (default: 3)
    /// - `PIPELINE_RETRY_BASE_MS`: Base backoff delay (default: 1000)
    /// - `PIPELINE_RETRY_MAX_MS`: Backoff cap (default: 30000)
    /// - `PIPELINE_GENERATION_MODEL`: Generation model (default: openai/gpt-4o-mini)
    /// - `PIPELINE_SEARCH_MODEL`: Search model (default: perplexity/sonar)
    /// - `PIPELINE_TEMPERATURE`: LLM temperature (default: 0.3)
    /// - `PIPELINE_MAX_TOKENS`: Max output tokens (default: 4096)
    /// - `PIPELINE_PHRASES_PER_KEYWORD`: Phrases per keyword (default: 25)
    /// - `PIPELINE_LEASE_TTL_SECS`: Run lease lifetime (default: 600)
    /// - `PIPELINE_DISCONNECT_POLICY`: `detach` or `cancel` (default: detach)
    /// - `PIPELINE_EVENT_BUFFER`: Progress channel capacity (default: 256)
    /// - `PIPELINE_MAX_CONTEXT_CHARS`: Domain context cap (default: 12000)
    /// - `DATABASE_URL`: SQLite URL (default: sqlite://keyword_forge.db)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if variables have invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Execution settings
        if let Ok(val) = std::env::var("PIPELINE_MAX_CONCURRENT_KEYWORDS") {
            config.max_concurrent_keywords =
                parse_env_value(&val, "PIPELINE_MAX_CONCURRENT_KEYWORDS")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_PHASE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_PHASE_TIMEOUT_SECS")?;
            config.phase_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_ATTEMPTS") {
            let attempts: u32 = parse_env_value(&val, "PIPELINE_MAX_ATTEMPTS")?;
            config.retry = config.retry.with_max_attempts(attempts);
        }

        if let Ok(val) = std::env::var("PIPELINE_RETRY_BASE_MS") {
            let ms: u64 = parse_env_value(&val, "PIPELINE_RETRY_BASE_MS")?;
            config.retry = config.retry.with_base_delay(Duration::from_millis(ms));
        }

        if let Ok(val) = std::env::var("PIPELINE_RETRY_MAX_MS") {
            let ms: u64 = parse_env_value(&val, "PIPELINE_RETRY_MAX_MS")?;
            config.retry = config.retry.with_max_delay(Duration::from_millis(ms));
        }

        // LLM settings
        if let Ok(val) = std::env::var("PIPELINE_GENERATION_MODEL") {
            config.generation_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_SEARCH_MODEL") {
            config.search_model = val;
        }

        if let Ok(val) = std::env::var("PIPELINE_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "PIPELINE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_TOKENS") {
            config.max_tokens = parse_env_value(&val, "PIPELINE_MAX_TOKENS")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_PHRASES_PER_KEYWORD") {
            config.phrases_per_keyword = parse_env_value(&val, "PIPELINE_PHRASES_PER_KEYWORD")?;
        }

        // Run settings
        if let Ok(val) = std::env::var("PIPELINE_LEASE_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "PIPELINE_LEASE_TTL_SECS")?;
            config.lease_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PIPELINE_DISCONNECT_POLICY") {
            config.disconnect_policy = parse_env_value(&val, "PIPELINE_DISCONNECT_POLICY")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_EVENT_BUFFER") {
            config.event_buffer = parse_env_value(&val, "PIPELINE_EVENT_BUFFER")?;
        }

        if let Ok(val) = std::env::var("PIPELINE_MAX_CONTEXT_CHARS") {
            config.max_context_chars = parse_env_value(&val, "PIPELINE_MAX_CONTEXT_CHARS")?;
        }

        // Storage settings
        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_keywords == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_keywords must be greater than 0".to_string(),
            ));
        }

        if self.phase_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "phase_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationFailed(
                "retry jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.generation_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "generation_model cannot be empty".to_string(),
            ));
        }

        if self.search_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "search_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.phrases_per_keyword == 0 {
            return Err(ConfigError::ValidationFailed(
                "phrases_per_keyword must be greater than 0".to_string(),
            ));
        }

        if self.lease_ttl < Duration::from_secs(3) {
            return Err(ConfigError::ValidationFailed(
                "lease_ttl must be at least 3 seconds".to_string(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationFailed(
                "event_buffer must be greater than 0".to_string(),
            ));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set max concurrent keywords.
    pub fn with_max_concurrent_keywords(mut self, max: usize) -> Self {
        self.max_concurrent_keywords = max;
        self
    }

    /// Builder method to set the per-attempt timeout.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Builder method to set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder method to set the generation model.
    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = model.into();
        self
    }

    /// Builder method to set the search model.
    pub fn with_search_model(mut self, model: impl Into<String>) -> Self {
        self.search_model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_phrases_per_keyword(mut self, count: usize) -> Self {
        self.phrases_per_keyword = count;
        self
    }

    /// Builder method to set the run lease lifetime.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_disconnect_policy(mut self, policy: DisconnectPolicy) -> Self {
        self.disconnect_policy = policy;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_max_context_chars(mut self, max: usize) -> Self {
        self.max_context_chars = max;
        self
    }

    /// Builder method to set database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
