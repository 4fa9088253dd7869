//! Pipeline coordinator.
//!
//! Drives one run over a domain and a fixed set of its keywords:
//!
//! 1. Take the per-domain [`RunLease`].
//! 2. Validate the domain and the requested keywords.
//! 3. Run the three domain phases sequentially. Any failure aborts the run.
//! 4. Fan out over keywords (bounded by `max_concurrent_keywords`), each
//!    running phases 4-7 in order. A keyword failure is isolated to that
//!    keyword.
//! 5. Emit exactly one terminal event: `run:complete` or `run:error`.
//!
//! Every (scope, phase) goes through the checkpoint store first; completed
//! rows are reused without calling the executor, which is what makes a rerun
//! of an unchanged domain free.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::lease::RunLease;
use super::outcome::{KeywordFailure, RunOutcome, RunStatus};
use super::phases::{
    normalize_intent, phrase_key, CommunityInsights, CompetitorResearch, IntentClassification,
    IntentLabel, Phase, PhraseGeneration, RelevanceEntry, RelevanceScoring, SearchPatterns,
    SemanticAnalysis, UNKNOWN_INTENT,
};
use super::types::{CheckpointUpdate, Domain, GeneratedPhrase, Keyword, Scope};
use crate::context::ContextAggregator;
use crate::error::{ErrorKind, ExecutorError, PipelineError, StoreError};
use crate::executor::{TaskExecutor, TaskSpec};
use crate::llm::CostUnits;
use crate::metrics::MetricsCollector;
use crate::progress::{PhaseStep, ProgressEmitter, ProgressEvent};
use crate::prompts::build_phase_prompt;
use crate::storage::{CheckpointStore, DomainSource};
use crate::utils::{parse_typed, Repaired};

/// What to run. An empty `keyword_ids` means every keyword of the domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub domain_id: String,
    pub keyword_ids: Vec<String>,
}

impl RunRequest {
    pub fn new(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            keyword_ids: Vec::new(),
        }
    }

    pub fn with_keywords<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keyword_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of one phase, executed or reused.
#[derive(Debug, Clone)]
struct PhaseRun {
    value: Value,
    degraded: bool,
    reused: bool,
    cost: CostUnits,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    executed: usize,
    reused: usize,
    degraded: usize,
    external_calls: usize,
    cost: CostUnits,
}

impl Counters {
    fn record(&mut self, run: &PhaseRun) {
        if run.reused {
            self.reused += 1;
        } else {
            self.executed += 1;
            self.external_calls += 1;
            self.cost += run.cost;
        }
        if run.degraded {
            self.degraded += 1;
        }
    }

    fn record_failed_call(&mut self, cost: CostUnits) {
        self.external_calls += 1;
        self.cost += cost;
    }

    fn merge(&mut self, other: &Counters) {
        self.executed += other.executed;
        self.reused += other.reused;
        self.degraded += other.degraded;
        self.external_calls += other.external_calls;
        self.cost += other.cost;
    }
}

/// Why a phase did not complete, whether the executor was called, and what
/// the failed call consumed.
struct PhaseFailure {
    error: PipelineError,
    called: bool,
    cost: CostUnits,
}

impl From<StoreError> for PhaseFailure {
    fn from(err: StoreError) -> Self {
        Self {
            error: PipelineError::Persistence(err),
            called: false,
            cost: CostUnits::default(),
        }
    }
}

struct KeywordReport {
    counters: Counters,
    phrases: usize,
    phrases_written: usize,
    failure: Option<(Phase, PipelineError)>,
}

/// Terminal error plus the keyword failures collected before it.
struct RunFailure {
    error: PipelineError,
    failures: Vec<KeywordFailure>,
}

impl From<PipelineError> for RunFailure {
    fn from(error: PipelineError) -> Self {
        Self {
            error,
            failures: Vec::new(),
        }
    }
}

impl From<StoreError> for RunFailure {
    fn from(err: StoreError) -> Self {
        PipelineError::Persistence(err).into()
    }
}

/// Per-run state shared by every phase of the run.
struct RunContext<'a> {
    run_id: &'a str,
    domain: &'a Domain,
    emitter: &'a ProgressEmitter,
    /// Any domain phase result came from the repair fallback.
    domain_degraded: bool,
}

/// Runs the seven-phase keyword research pipeline.
pub struct PipelineCoordinator {
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn DomainSource>,
    executor: Arc<dyn TaskExecutor>,
    aggregator: ContextAggregator,
    config: PipelineConfig,
    metrics: MetricsCollector,
}

impl PipelineCoordinator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        source: Arc<dyn DomainSource>,
        executor: Arc<dyn TaskExecutor>,
        config: PipelineConfig,
    ) -> Self {
        let aggregator = ContextAggregator::new(config.max_context_chars);
        Self {
            store,
            source,
            executor,
            aggregator,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Progress channel sized and configured from [`PipelineConfig`].
    pub fn progress_channel(&self) -> (ProgressEmitter, mpsc::Receiver<ProgressEvent>) {
        ProgressEmitter::channel(self.config.event_buffer, self.config.disconnect_policy)
    }

    /// Run on a separate tokio task. Dropping the event receiver does not
    /// stop the run unless the emitter's policy is `Cancel`.
    pub fn spawn_run(
        self: Arc<Self>,
        request: RunRequest,
        emitter: ProgressEmitter,
    ) -> JoinHandle<Result<RunOutcome, PipelineError>> {
        tokio::spawn(async move { self.run(request, emitter).await })
    }

    /// Execute one run and emit its terminal event.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the config fails [`PipelineConfig::validate`]
    /// - `ConcurrentRunConflict` if another run holds the domain's lease
    /// - `NotFound` for an unknown domain or a keyword outside the domain
    /// - `TransientExternal` / `PermanentExternal` / `Cancelled` when a
    ///   domain phase fails
    /// - `Persistence` on any store failure
    /// - `AllKeywordsFailed` when no keyword finished
    pub async fn run(
        &self,
        request: RunRequest,
        emitter: ProgressEmitter,
    ) -> Result<RunOutcome, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        tracing::info!(
            run_id = %run_id,
            domain_id = %request.domain_id,
            requested_keywords = request.keyword_ids.len(),
            "Pipeline run requested"
        );

        match self.run_leased(&run_id, &request, &emitter, started).await {
            Ok(outcome) => {
                tracing::info!(
                    run_id = %run_id,
                    status = %outcome.status,
                    keywords_succeeded = outcome.keywords_succeeded,
                    keywords_failed = outcome.keywords_failed,
                    phases_executed = outcome.phases_executed,
                    phases_reused = outcome.phases_reused,
                    cost_usd = format!("{:.4}", outcome.cost_usd()),
                    "Pipeline run finished"
                );
                self.metrics.record_run(outcome.status.as_str());
                emitter
                    .send(ProgressEvent::RunComplete {
                        outcome: outcome.clone(),
                    })
                    .await;
                Ok(outcome)
            }
            Err(RunFailure { error, failures }) => {
                tracing::error!(
                    run_id = %run_id,
                    kind = %error.kind(),
                    error = %error,
                    "Pipeline run failed"
                );
                self.metrics.record_run(RunStatus::Failed.as_str());
                emitter
                    .send(ProgressEvent::RunError {
                        kind: error.kind(),
                        message: error.to_string(),
                        failed_keywords: failures,
                    })
                    .await;
                Err(error)
            }
        }
    }

    async fn run_leased(
        &self,
        run_id: &str,
        request: &RunRequest,
        emitter: &ProgressEmitter,
        started: Instant,
    ) -> Result<RunOutcome, RunFailure> {
        self.config
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        let lease = RunLease::acquire(
            self.store.clone(),
            &request.domain_id,
            run_id,
            self.config.lease_ttl,
        )
        .await?;

        let result = self.execute(run_id, request, emitter, started).await;

        if lease.is_lost() {
            tracing::warn!(run_id = %run_id, "Run lease was lost while running");
        }
        if let Err(e) = lease.release().await {
            // The lease expires on its own; the run result stands.
            tracing::warn!(run_id = %run_id, error = %e, "Failed to release run lease");
        }

        result
    }

    async fn execute(
        &self,
        run_id: &str,
        request: &RunRequest,
        emitter: &ProgressEmitter,
        started: Instant,
    ) -> Result<RunOutcome, RunFailure> {
        let domain = self
            .source
            .load_domain(&request.domain_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("domain '{}'", request.domain_id)))?;
        let keywords = self.select_keywords(&domain, &request.keyword_ids).await?;

        emitter
            .send(ProgressEvent::RunStarted {
                run_id: run_id.to_string(),
                domain_id: domain.id.clone(),
                keyword_count: keywords.len(),
            })
            .await;

        let mut counters = Counters::default();
        let mut run = RunContext {
            run_id,
            domain: &domain,
            emitter,
            domain_degraded: false,
        };

        // Domain phases: strictly sequential, failure aborts the run.
        let domain_scope = Scope::domain(&domain.id);
        for phase in Phase::DOMAIN {
            match self.run_phase(&run, &domain_scope, phase, None).await {
                Ok(result) => {
                    counters.record(&result);
                    run.domain_degraded |= result.degraded;
                }
                Err(failure) => {
                    tracing::error!(
                        run_id = %run_id,
                        domain_id = %domain.id,
                        phase = %phase,
                        error = %failure.error,
                        "Domain phase failed, aborting run"
                    );
                    return Err(failure.error.into());
                }
            }
        }

        // Keyword phases: bounded fan-out, failures isolated per keyword.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_keywords));
        let run = &run;
        let keyword_futures = keywords.iter().map(|keyword| {
            let sem = semaphore.clone();
            async move {
                let _permit = match sem.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return KeywordReport {
                            counters: Counters::default(),
                            phrases: 0,
                            phrases_written: 0,
                            failure: Some((
                                Phase::SearchPatterns,
                                PipelineError::Cancelled("keyword scheduler closed".into()),
                            )),
                        }
                    }
                };
                self.run_keyword(run, keyword).await
            }
        });
        let reports = join_all(keyword_futures).await;

        let mut failures = Vec::new();
        let mut fatal: Option<PipelineError> = None;
        let mut phrases_written = 0;
        for (keyword, report) in keywords.iter().zip(reports) {
            counters.merge(&report.counters);
            phrases_written += report.phrases_written;
            if let Some((phase, error)) = report.failure {
                failures.push(KeywordFailure {
                    keyword_id: keyword.id.clone(),
                    term: keyword.term.clone(),
                    phase,
                    kind: error.kind(),
                    message: error.to_string(),
                });
                if error.kind() == ErrorKind::Persistence && fatal.is_none() {
                    fatal = Some(error);
                }
            }
        }

        if let Some(error) = fatal {
            return Err(RunFailure { error, failures });
        }

        let failed = failures.len();
        let succeeded = keywords.len() - failed;
        if emitter.is_cancelled() && failed > 0 {
            return Err(RunFailure {
                error: PipelineError::Cancelled("progress receiver disconnected".into()),
                failures,
            });
        }
        if succeeded == 0 && failed > 0 {
            return Err(RunFailure {
                error: PipelineError::AllKeywordsFailed { count: failed },
                failures,
            });
        }

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            status: RunStatus::from_counts(succeeded, failed),
            domain_id: domain.id.clone(),
            keywords_total: keywords.len(),
            keywords_succeeded: succeeded,
            keywords_failed: failed,
            phases_executed: counters.executed,
            phases_reused: counters.reused,
            phases_degraded: counters.degraded,
            external_calls: counters.external_calls,
            phrases_written,
            cost: counters.cost,
            failures,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Resolve the requested keyword ids against the domain's keywords.
    async fn select_keywords(
        &self,
        domain: &Domain,
        requested: &[String],
    ) -> Result<Vec<Keyword>, PipelineError> {
        let available = self.source.load_keywords(&domain.id).await?;
        if requested.is_empty() {
            return Ok(available);
        }

        let mut selected: Vec<Keyword> = Vec::with_capacity(requested.len());
        for id in requested {
            if selected.iter().any(|k| &k.id == id) {
                continue;
            }
            let keyword = available
                .iter()
                .find(|k| &k.id == id)
                .ok_or_else(|| {
                    PipelineError::NotFound(format!("keyword '{}' in domain '{}'", id, domain.id))
                })?;
            selected.push(keyword.clone());
        }
        Ok(selected)
    }

    async fn run_keyword(&self, run: &RunContext<'_>, keyword: &Keyword) -> KeywordReport {
        let scope = Scope::keyword(keyword);
        let mut report = KeywordReport {
            counters: Counters::default(),
            phrases: 0,
            phrases_written: 0,
            failure: None,
        };
        let mut results: HashMap<Phase, PhaseRun> = HashMap::new();

        self.metrics.keyword_started();

        for phase in Phase::KEYWORD {
            match self.run_phase(run, &scope, phase, Some(keyword)).await {
                Ok(result) => {
                    report.counters.record(&result);
                    results.insert(phase, result);
                }
                Err(failure) => {
                    if failure.called {
                        report.counters.record_failed_call(failure.cost);
                    }
                    report.failure = Some((phase, failure.error));
                    break;
                }
            }
        }

        if report.failure.is_none() {
            match self.persist_phrases(run, keyword, &results).await {
                Ok((total, written)) => {
                    report.phrases = total;
                    report.phrases_written = written;
                }
                Err(e) => {
                    report.failure = Some((Phase::RelevanceScoring, PipelineError::Persistence(e)));
                }
            }
        }

        if let Some((phase, error)) = &report.failure {
            tracing::warn!(
                run_id = %run.run_id,
                keyword_id = %keyword.id,
                phase = %phase,
                kind = %error.kind(),
                error = %error,
                "Keyword failed"
            );
            if error.kind() == ErrorKind::Persistence {
                // Stop the other keywords at their next suspension point.
                run.emitter.cancel();
            }
        } else {
            tracing::info!(
                run_id = %run.run_id,
                keyword_id = %keyword.id,
                phrases = report.phrases,
                "Keyword completed"
            );
        }

        self.metrics.keyword_finished();

        let failure = report
            .failure
            .as_ref()
            .map(|(phase, error)| KeywordFailure {
                keyword_id: keyword.id.clone(),
                term: keyword.term.clone(),
                phase: *phase,
                kind: error.kind(),
                message: error.to_string(),
            });
        run.emitter
            .send(ProgressEvent::KeywordFinished {
                keyword_id: keyword.id.clone(),
                term: keyword.term.clone(),
                succeeded: failure.is_none(),
                phrases: report.phrases,
                failure,
            })
            .await;

        report
    }

    /// Write the combined phrases when the phrase stage ran in this run or
    /// when they are missing. Returns (phrase count, phrases written).
    async fn persist_phrases(
        &self,
        run: &RunContext<'_>,
        keyword: &Keyword,
        results: &HashMap<Phase, PhaseRun>,
    ) -> Result<(usize, usize), StoreError> {
        let stage_ran = results
            .iter()
            .any(|(phase, result)| phase.is_phrase_stage() && !result.reused);

        let phrases = combine_phrases(keyword, results, run.domain_degraded);

        if !stage_ran {
            let stored = self.store.phrases_for(&keyword.id).await?;
            if !stored.is_empty() || phrases.is_empty() {
                return Ok((stored.len(), 0));
            }
            tracing::info!(
                keyword_id = %keyword.id,
                "Phrase rows missing for completed checkpoints, rewriting"
            );
        }

        self.store.replace_phrases(&keyword.id, &phrases).await?;
        Ok((phrases.len(), phrases.len()))
    }

    /// Reuse or execute one (scope, phase).
    async fn run_phase(
        &self,
        run: &RunContext<'_>,
        scope: &Scope,
        phase: Phase,
        keyword: Option<&Keyword>,
    ) -> Result<PhaseRun, PhaseFailure> {
        let emitter = run.emitter;

        if let Some(existing) = self.store.get(scope, phase).await? {
            if existing.is_completed() {
                tracing::debug!(scope = %scope, phase = %phase, "Reusing completed phase");
                emitter
                    .emit(
                        scope,
                        phase,
                        PhaseStep::Reused,
                        100,
                        Some(json!({ "degraded": existing.degraded })),
                    )
                    .await;
                self.metrics
                    .record_phase(phase.as_str(), "reused", 0.0, false);
                return Ok(PhaseRun {
                    value: existing.result.unwrap_or(Value::Null),
                    degraded: existing.degraded,
                    reused: true,
                    cost: CostUnits::default(),
                });
            }
        }

        if emitter.is_cancelled() {
            return Err(PhaseFailure {
                error: PipelineError::Cancelled(format!("{} not started", phase)),
                called: false,
                cost: CostUnits::default(),
            });
        }

        let started = Instant::now();
        self.store
            .put(scope, phase, CheckpointUpdate::running(0))
            .await?;
        emitter
            .emit(scope, phase, PhaseStep::Started, 0, None)
            .await;

        let records = self.store.completed_for(scope).await?;
        let blob = self
            .aggregator
            .build(scope, phase, run.domain, keyword, &records);
        let fingerprint = blob.fingerprint();
        let prompt = build_phase_prompt(phase, &blob, self.config.phrases_per_keyword);
        let spec = TaskSpec::new(phase.as_str(), phase.backend(), prompt.system, prompt.user)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        self.store
            .put(scope, phase, CheckpointUpdate::running(20))
            .await?;
        emitter
            .emit(scope, phase, PhaseStep::Progress, 20, None)
            .await;

        tracing::debug!(
            run_id = %run.run_id,
            scope = %scope,
            phase = %phase,
            backend = %spec.backend,
            degraded_inputs = blob.degraded_inputs.len(),
            "Executing phase"
        );

        let output = tokio::select! {
            result = self.executor.execute(&spec, self.config.phase_timeout) => result,
            _ = emitter.cancelled() => Err(ExecutorError::Cancelled),
        };

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                let message = err.to_string();
                self.store
                    .put(scope, phase, CheckpointUpdate::failed(20, &message))
                    .await?;
                emitter
                    .emit(
                        scope,
                        phase,
                        PhaseStep::Failed,
                        20,
                        Some(json!({ "kind": err.kind(), "error": message })),
                    )
                    .await;
                self.metrics.record_phase(
                    phase.as_str(),
                    "failed",
                    started.elapsed().as_secs_f64(),
                    false,
                );
                let cost = err.cost();
                return Err(PhaseFailure {
                    error: err.into(),
                    called: true,
                    cost,
                });
            }
        };

        let Repaired { value, degraded } = parse_phase_result(phase, &output.raw_text)?;
        if degraded {
            tracing::warn!(
                scope = %scope,
                phase = %phase,
                finish_reason = %output.finish_reason,
                "Phase result recovered from malformed output"
            );
        }

        self.store
            .put(
                scope,
                phase,
                CheckpointUpdate::completed(value.clone(), degraded).with_fingerprint(fingerprint),
            )
            .await?;
        emitter
            .emit(
                scope,
                phase,
                PhaseStep::Completed,
                100,
                Some(json!({ "degraded": degraded, "attempts": output.attempts })),
            )
            .await;
        self.metrics.record_phase(
            phase.as_str(),
            "completed",
            started.elapsed().as_secs_f64(),
            degraded,
        );

        Ok(PhaseRun {
            value,
            degraded,
            reused: false,
            cost: output.cost,
        })
    }
}

/// Repair-parse raw backend text into the phase's result shape.
fn parse_phase_result(phase: Phase, raw: &str) -> Result<Repaired<Value>, StoreError> {
    match phase {
        Phase::SemanticAnalysis => typed::<SemanticAnalysis>(raw),
        Phase::CommunityInsights => typed::<CommunityInsights>(raw),
        Phase::CompetitorResearch => typed::<CompetitorResearch>(raw),
        Phase::SearchPatterns => typed::<SearchPatterns>(raw),
        Phase::PhraseGeneration => typed::<PhraseGeneration>(raw),
        Phase::IntentClassification => typed::<IntentClassification>(raw),
        Phase::RelevanceScoring => typed::<RelevanceScoring>(raw),
    }
}

fn typed<T>(raw: &str) -> Result<Repaired<Value>, StoreError>
where
    T: DeserializeOwned + Default + Serialize,
{
    let Repaired { value, degraded } = parse_typed::<T>(raw);
    Ok(Repaired {
        value: serde_json::to_value(value)?,
        degraded,
    })
}

fn section<T>(results: &HashMap<Phase, PhaseRun>, phase: Phase) -> T
where
    T: DeserializeOwned + Default,
{
    results
        .get(&phase)
        .and_then(|run| serde_json::from_value(run.value.clone()).ok())
        .unwrap_or_default()
}

/// Join phrase generation with intent and relevance by normalized text.
///
/// No generated phrase is dropped: unmatched intent defaults to `unknown`
/// with confidence 0, unmatched score to 0, and both set `low_confidence`.
/// Blank and repeated phrases are skipped.
fn combine_phrases(
    keyword: &Keyword,
    results: &HashMap<Phase, PhaseRun>,
    domain_degraded: bool,
) -> Vec<GeneratedPhrase> {
    let generated: PhraseGeneration = section(results, Phase::PhraseGeneration);
    let intents: IntentClassification = section(results, Phase::IntentClassification);
    let scores: RelevanceScoring = section(results, Phase::RelevanceScoring);

    let inputs_degraded = domain_degraded
        || Phase::KEYWORD
            .iter()
            .any(|phase| results.get(phase).is_some_and(|run| run.degraded));

    let mut intent_by_key: HashMap<String, &IntentLabel> = HashMap::new();
    for label in &intents.classifications {
        intent_by_key.entry(phrase_key(&label.phrase)).or_insert(label);
    }
    let mut score_by_key: HashMap<String, &RelevanceEntry> = HashMap::new();
    for entry in &scores.scores {
        score_by_key.entry(phrase_key(&entry.phrase)).or_insert(entry);
    }

    let mut seen = std::collections::HashSet::new();
    let mut phrases = Vec::with_capacity(generated.phrases.len());

    for candidate in &generated.phrases {
        let text = candidate.text.trim();
        let key = phrase_key(text);
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }

        let mut low_confidence = inputs_degraded;

        let (intent_label, intent_confidence) = match intent_by_key.get(&key) {
            Some(label) => {
                let intent = normalize_intent(&label.intent);
                if intent == UNKNOWN_INTENT {
                    low_confidence = true;
                }
                let confidence = if label.confidence.is_finite() {
                    label.confidence.clamp(0.0, 1.0)
                } else {
                    low_confidence = true;
                    0.0
                };
                (intent, confidence)
            }
            None => {
                low_confidence = true;
                (UNKNOWN_INTENT.to_string(), 0.0)
            }
        };

        let relevance_score = match score_by_key.get(&key) {
            Some(entry) if entry.score.is_finite() => entry.score.clamp(0.0, 100.0).round() as u8,
            _ => {
                low_confidence = true;
                0
            }
        };

        let trend_label = if candidate.trend.trim().is_empty() {
            "unknown".to_string()
        } else {
            candidate.trend.trim().to_lowercase()
        };

        phrases.push(GeneratedPhrase {
            keyword_id: keyword.id.clone(),
            position: phrases.len() as u32,
            text: text.to_string(),
            intent_label,
            intent_confidence,
            relevance_score,
            source_tags: candidate.source_tags.clone(),
            trend_label,
            low_confidence,
        });
    }

    phrases
}
