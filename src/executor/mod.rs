//! External task execution.
//!
//! A [`TaskSpec`] is an opaque description of one backend call: which backend,
//! what prompt, how many tokens. [`TaskExecutor::execute`] runs it under a
//! timeout and the shared [`RetryPolicy`], returning the raw text and what the
//! call cost. Callers never retry on their own.

pub mod retry;

pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ExecutorError, LlmError};
use crate::llm::{CostUnits, GenerationRequest, LlmProvider, Message, ModelPricing};
use crate::metrics::{MetricsCollector, TokenUsage};

/// Which external backend a task runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Plain text generation.
    Generation,
    /// Search-grounded generation with live web results.
    Search,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Generation => "generation",
            Backend::Search => "search",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of external work.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    /// Label used in logs and metrics (the phase name).
    pub name: String,
    pub backend: Backend,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl TaskSpec {
    pub fn new(
        name: impl Into<String>,
        backend: Backend,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 4096,
            temperature: 0.3,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Raw output of a successful task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub raw_text: String,
    /// Usage across every attempt, failed ones included.
    pub cost: CostUnits,
    pub attempts: u32,
    /// Backend-reported stop reason; "length" usually means truncated output.
    pub finish_reason: String,
}

/// Executes task specifications against external backends.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `spec`, bounding each attempt by `timeout`.
    ///
    /// # Errors
    ///
    /// `ExecutorError::Transient` once retries are exhausted,
    /// `ExecutorError::Permanent` immediately for non-retryable failures.
    async fn execute(&self, spec: &TaskSpec, timeout: Duration)
        -> Result<TaskOutput, ExecutorError>;
}

/// A provider bound to the model it should be asked for.
#[derive(Clone)]
pub struct BackendTarget {
    pub provider: Arc<dyn LlmProvider>,
    pub model: String,
    pub pricing: ModelPricing,
}

impl BackendTarget {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        let model = model.into();
        let pricing = ModelPricing::for_model(&model);
        Self {
            provider,
            model,
            pricing,
        }
    }

    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = pricing;
        self
    }
}

/// [`TaskExecutor`] routing generation and search tasks to LLM providers.
pub struct BackendExecutor {
    generation: BackendTarget,
    search: BackendTarget,
    policy: RetryPolicy,
    metrics: MetricsCollector,
}

impl BackendExecutor {
    pub fn new(generation: BackendTarget, search: BackendTarget, policy: RetryPolicy) -> Self {
        Self {
            generation,
            search,
            policy,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn target(&self, backend: Backend) -> &BackendTarget {
        match backend {
            Backend::Generation => &self.generation,
            Backend::Search => &self.search,
        }
    }

    fn build_request(target: &BackendTarget, spec: &TaskSpec) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if !spec.system.is_empty() {
            messages.push(Message::system(spec.system.clone()));
        }
        messages.push(Message::user(spec.prompt.clone()));

        GenerationRequest::new(target.model.clone(), messages)
            .with_temperature(spec.temperature)
            .with_max_tokens(spec.max_tokens)
    }
}

#[async_trait]
impl TaskExecutor for BackendExecutor {
    async fn execute(
        &self,
        spec: &TaskSpec,
        timeout: Duration,
    ) -> Result<TaskOutput, ExecutorError> {
        let target = self.target(spec.backend);
        let backend = spec.backend.as_str();
        let request = Self::build_request(target, spec);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut cost = CostUnits::default();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout(timeout, target.provider.generate(request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LlmError::Timeout(format!(
                        "no response within {}s",
                        timeout.as_secs_f64()
                    ))),
                };
            let latency = started.elapsed().as_secs_f64();

            let err = match outcome {
                Ok(response) => {
                    let usage = response.usage;
                    let call_cost = CostUnits::from_usage(
                        &target.pricing,
                        u64::from(usage.prompt_tokens),
                        u64::from(usage.completion_tokens),
                    );
                    cost += call_cost;
                    self.metrics.record_external_request(
                        backend,
                        &target.model,
                        "success",
                        latency,
                        TokenUsage::new(call_cost.input_tokens, call_cost.output_tokens),
                        call_cost.cost_micros,
                    );

                    let (raw_text, finish_reason) = match response.choices.into_iter().next() {
                        Some(choice) => (choice.message.content, choice.finish_reason),
                        None => (String::new(), "empty".to_string()),
                    };

                    if finish_reason == "length" {
                        tracing::warn!(
                            task = %spec.name,
                            backend = backend,
                            max_tokens = spec.max_tokens,
                            "Backend stopped at token limit, output is likely truncated"
                        );
                    }

                    tracing::debug!(
                        task = %spec.name,
                        backend = backend,
                        attempt = attempt,
                        latency_secs = latency,
                        input_tokens = call_cost.input_tokens,
                        output_tokens = call_cost.output_tokens,
                        "External task completed"
                    );

                    return Ok(TaskOutput {
                        raw_text,
                        cost,
                        attempts: attempt,
                        finish_reason,
                    });
                }
                Err(err) => err,
            };

            cost += CostUnits::failed_request();
            let transient = err.is_transient();
            self.metrics.record_external_request(
                backend,
                &target.model,
                if transient {
                    "transient_error"
                } else {
                    "permanent_error"
                },
                latency,
                TokenUsage::default(),
                0,
            );

            if !transient {
                tracing::error!(
                    task = %spec.name,
                    backend = backend,
                    attempt = attempt,
                    error = %err,
                    "Permanent backend failure"
                );
                return Err(ExecutorError::Permanent {
                    attempts: attempt,
                    message: err.to_string(),
                    cost,
                });
            }

            if attempt == max_attempts {
                tracing::error!(
                    task = %spec.name,
                    backend = backend,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(ExecutorError::Transient {
                    attempts: attempt,
                    message: err.to_string(),
                    cost,
                });
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                task = %spec.name,
                backend = backend,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient error, will retry"
            );
            self.metrics.record_retry(backend);
            tokio::time::sleep(delay).await;
        }

        Err(ExecutorError::Transient {
            attempts: max_attempts,
            message: "retry loop exited without a result".to_string(),
            cost,
        })
    }
}
