//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! been called, so library code can record unconditionally.

use super::prometheus::{
    ACTIVE_KEYWORDS, DEGRADED_RESULTS_TOTAL, EXTERNAL_LATENCY, EXTERNAL_REQUESTS_TOTAL,
    EXTERNAL_RETRIES_TOTAL, LLM_COST_MICROS, LLM_TOKENS_TOTAL, PHASE_DURATION, PHASE_RUNS_TOTAL,
    RUNS_TOTAL,
};

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Metrics collector for recording keyword-forge operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the terminal status of a run ("success", "partial_success", "failed").
    pub fn record_run(&self, status: &str) {
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&[status]).inc();
        }
    }

    /// Record a phase outcome. `duration_secs` is ignored for reused phases.
    pub fn record_phase(&self, phase: &str, outcome: &str, duration_secs: f64, degraded: bool) {
        if let Some(phase_runs) = PHASE_RUNS_TOTAL.get() {
            phase_runs.with_label_values(&[phase, outcome]).inc();
        }

        if outcome != "reused" {
            if let Some(duration) = PHASE_DURATION.get() {
                duration.with_label_values(&[phase]).observe(duration_secs);
            }
        }

        if degraded {
            if let Some(degraded_results) = DEGRADED_RESULTS_TOTAL.get() {
                degraded_results.with_label_values(&[phase]).inc();
            }
        }

        tracing::trace!(
            phase = phase,
            outcome = outcome,
            duration_secs = duration_secs,
            degraded = degraded,
            "Recorded phase metric"
        );
    }

    /// Record one HTTP request to an external backend.
    ///
    /// `outcome` is "success", "transient_error" or "permanent_error".
    pub fn record_external_request(
        &self,
        backend: &str,
        model: &str,
        outcome: &str,
        latency_secs: f64,
        tokens: TokenUsage,
        cost_micros: u64,
    ) {
        if let Some(requests) = EXTERNAL_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[backend, model, outcome]).inc();
        }

        if let Some(latency) = EXTERNAL_LATENCY.get() {
            latency.with_label_values(&[backend]).observe(latency_secs);
        }

        if tokens.total() > 0 {
            if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
                llm_tokens
                    .with_label_values(&[model, "input"])
                    .inc_by(tokens.input_tokens as f64);
                llm_tokens
                    .with_label_values(&[model, "output"])
                    .inc_by(tokens.output_tokens as f64);
            }
        }

        if cost_micros > 0 {
            if let Some(cost) = LLM_COST_MICROS.get() {
                cost.with_label_values(&[model]).inc_by(cost_micros as f64);
            }
        }
    }

    pub fn record_retry(&self, backend: &str) {
        if let Some(retries) = EXTERNAL_RETRIES_TOTAL.get() {
            retries.with_label_values(&[backend]).inc();
        }
    }

    pub fn keyword_started(&self) {
        if let Some(active) = ACTIVE_KEYWORDS.get() {
            active.inc();
        }
    }

    pub fn keyword_finished(&self) {
        if let Some(active) = ACTIVE_KEYWORDS.get() {
            active.dec();
        }
    }
}
