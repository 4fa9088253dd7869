//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by keyword-forge and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all keyword-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Pipeline runs, labeled by terminal status.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Phase executions, labeled by phase and outcome (completed, failed, reused).
pub static PHASE_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Phase execution duration in seconds, labeled by phase.
pub static PHASE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Results produced through the repair parser's fallback path, labeled by phase.
pub static DEGRADED_RESULTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Keywords currently being processed.
pub static ACTIVE_KEYWORDS: OnceLock<Gauge> = OnceLock::new();

/// External backend requests, labeled by backend, model and outcome.
pub static EXTERNAL_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Retries scheduled after transient failures, labeled by backend.
pub static EXTERNAL_RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// External request latency in seconds, labeled by backend.
pub static EXTERNAL_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Estimated spend in micro-dollars, labeled by model.
pub static LLM_COST_MICROS: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it more than once is harmless: later calls build a fresh registry
/// but the statics keep the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("keyword_forge_runs_total", "Total pipeline runs"),
        &["status"],
    )?;

    let phase_runs_total = CounterVec::new(
        Opts::new("keyword_forge_phase_runs_total", "Total phase executions"),
        &["phase", "outcome"],
    )?;

    let phase_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "keyword_forge_phase_duration_seconds",
            "Phase execution duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["phase"],
    )?;

    let degraded_results_total = CounterVec::new(
        Opts::new(
            "keyword_forge_degraded_results_total",
            "Phase results recovered through the repair fallback",
        ),
        &["phase"],
    )?;

    let active_keywords = Gauge::new(
        "keyword_forge_active_keywords",
        "Keywords currently being processed",
    )?;

    let external_requests_total = CounterVec::new(
        Opts::new(
            "keyword_forge_external_requests_total",
            "Total external backend requests",
        ),
        &["backend", "model", "outcome"],
    )?;

    let external_retries_total = CounterVec::new(
        Opts::new(
            "keyword_forge_external_retries_total",
            "Retries after transient backend failures",
        ),
        &["backend"],
    )?;

    let external_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "keyword_forge_external_latency_seconds",
            "External request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["backend"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("keyword_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let llm_cost_micros = CounterVec::new(
        Opts::new(
            "keyword_forge_llm_cost_micros",
            "Estimated LLM spend in micro-dollars",
        ),
        &["model"],
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(phase_runs_total.clone()))?;
    registry.register(Box::new(phase_duration.clone()))?;
    registry.register(Box::new(degraded_results_total.clone()))?;
    registry.register(Box::new(active_keywords.clone()))?;
    registry.register(Box::new(external_requests_total.clone()))?;
    registry.register(Box::new(external_retries_total.clone()))?;
    registry.register(Box::new(external_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(llm_cost_micros.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = PHASE_RUNS_TOTAL.set(phase_runs_total);
    let _ = PHASE_DURATION.set(phase_duration);
    let _ = DEGRADED_RESULTS_TOTAL.set(degraded_results_total);
    let _ = ACTIVE_KEYWORDS.set(active_keywords);
    let _ = EXTERNAL_REQUESTS_TOTAL.set(external_requests_total);
    let _ = EXTERNAL_RETRIES_TOTAL.set(external_retries_total);
    let _ = EXTERNAL_LATENCY.set(external_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = LLM_COST_MICROS.set(llm_cost_micros);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of failing when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
