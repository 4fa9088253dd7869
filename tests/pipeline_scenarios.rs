//! End-to-end runs of the coordinator against a temporary SQLite store and
//! scripted backends.

use async_trait::async_trait;
use keyword_forge::error::{ErrorKind, ExecutorError, LlmError, PipelineError, StoreError};
use keyword_forge::executor::{
    BackendExecutor, BackendTarget, RetryPolicy, TaskExecutor, TaskOutput, TaskSpec,
};
use keyword_forge::llm::{
    Choice, CostUnits, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
};
use keyword_forge::pipeline::{
    CheckpointUpdate, Domain, GeneratedPhrase, Keyword, Phase, PhaseExecution, PhaseStatus,
    PipelineConfig, PipelineCoordinator, RunOutcome, RunRequest, RunStatus, Scope,
};
use keyword_forge::progress::{DisconnectPolicy, PhaseStep, ProgressEmitter, ProgressEvent};
use keyword_forge::storage::{CheckpointStore, LeaseAcquisition, SqliteStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TERMS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const PHRASES_PER_KEYWORD: usize = 3;

// ============================================================================
// Scripted backends
// ============================================================================

fn response_for(phase: Phase, term: Option<&str>) -> String {
    let t = term.unwrap_or("none");
    let phrases = [
        format!("best {} tool", t),
        format!("{} pricing", t),
        format!("how to use {}", t),
    ];
    let value = match phase {
        Phase::SemanticAnalysis => json!({
            "summary": "Project management software for distributed teams",
            "core_topics": ["task tracking", "sprints"],
            "audience": ["remote managers"],
        }),
        Phase::CommunityInsights => json!({
            "pain_points": ["missed deadlines"],
            "questions": ["how do remote teams plan work"],
        }),
        Phase::CompetitorResearch => json!({
            "competitors": [{"name": "Rival", "url": "https://rival.example", "positioning": "cheap"}],
            "target_terms": ["kanban"],
        }),
        Phase::SearchPatterns => json!({
            "modifiers": ["best", "free"],
            "questions": [format!("what is {}", t)],
            "trends": [{"term": t, "direction": "rising"}],
        }),
        Phase::PhraseGeneration => json!({
            "phrases": phrases
                .iter()
                .map(|p| json!({"text": p, "source_tags": ["search"], "trend": "rising"}))
                .collect::<Vec<_>>(),
        }),
        Phase::IntentClassification => json!({
            "classifications": phrases
                .iter()
                .map(|p| json!({"phrase": p, "intent": "commercial", "confidence": 0.8}))
                .collect::<Vec<_>>(),
        }),
        Phase::RelevanceScoring => json!({
            "scores": phrases
                .iter()
                .map(|p| json!({"phrase": p, "score": 75}))
                .collect::<Vec<_>>(),
        }),
    };
    value.to_string()
}

/// A phrase-generation reply cut off mid-way through the second phrase.
fn truncated_phrases(term: &str) -> String {
    format!(
        "```json\n{{\"phrases\": [{{\"text\": \"best {} tool\", \"source_tags\": [\"search\"]}}, {{\"text\": \"{} pri",
        term, term
    )
}

fn term_in(prompt: &str) -> Option<&'static str> {
    TERMS.iter().copied().find(|term| prompt.contains(term))
}

/// Executor answering by phase name, recording every call.
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<(Phase, Option<String>)>>,
    failures: Mutex<Vec<(Phase, Option<&'static str>)>>,
    truncated: Mutex<Vec<(Phase, &'static str)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn fail(&self, phase: Phase, term: Option<&'static str>) {
        self.failures.lock().unwrap().push((phase, term));
    }

    fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn truncate(&self, phase: Phase, term: &'static str) {
        self.truncated.lock().unwrap().push((phase, term));
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls_for(&self, term: Option<&str>) -> Vec<Phase> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t.as_deref() == term)
            .map(|(phase, _)| *phase)
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        spec: &TaskSpec,
        _timeout: Duration,
    ) -> Result<TaskOutput, ExecutorError> {
        let phase: Phase = spec.name.parse().expect("task name is a phase");
        let term = term_in(&spec.prompt);
        self.calls
            .lock()
            .unwrap()
            .push((phase, term.map(str::to_string)));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self
            .failures
            .lock()
            .unwrap()
            .iter()
            .any(|(p, t)| *p == phase && *t == term)
        {
            return Err(ExecutorError::Permanent {
                attempts: 1,
                message: "API error (401): invalid credentials".into(),
                cost: CostUnits {
                    requests: 1,
                    ..CostUnits::default()
                },
            });
        }

        let truncated = term.is_some_and(|t| {
            self.truncated
                .lock()
                .unwrap()
                .iter()
                .any(|(p, tt)| *p == phase && *tt == t)
        });
        let raw_text = match (truncated, term) {
            (true, Some(t)) => truncated_phrases(t),
            _ => response_for(phase, term),
        };

        Ok(TaskOutput {
            raw_text,
            cost: CostUnits {
                input_tokens: 100,
                output_tokens: 50,
                requests: 1,
                cost_micros: 10,
            },
            attempts: 1,
            finish_reason: "stop".into(),
        })
    }
}

/// Store that fails phrase writes for one keyword.
struct FailingPhraseStore {
    inner: Arc<SqliteStore>,
    fail_keyword: &'static str,
}

#[async_trait]
impl CheckpointStore for FailingPhraseStore {
    async fn get(&self, scope: &Scope, phase: Phase) -> Result<Option<PhaseExecution>, StoreError> {
        self.inner.get(scope, phase).await
    }

    async fn put(
        &self,
        scope: &Scope,
        phase: Phase,
        update: CheckpointUpdate,
    ) -> Result<(), StoreError> {
        self.inner.put(scope, phase, update).await
    }

    async fn completed_for(&self, scope: &Scope) -> Result<Vec<PhaseExecution>, StoreError> {
        self.inner.completed_for(scope).await
    }

    async fn list_for_domain(&self, domain_id: &str) -> Result<Vec<PhaseExecution>, StoreError> {
        self.inner.list_for_domain(domain_id).await
    }

    async fn replace_phrases(
        &self,
        keyword_id: &str,
        phrases: &[GeneratedPhrase],
    ) -> Result<(), StoreError> {
        if keyword_id == self.fail_keyword {
            return Err(StoreError::InvalidRecord("disk I/O error".into()));
        }
        self.inner.replace_phrases(keyword_id, phrases).await
    }

    async fn phrases_for(&self, keyword_id: &str) -> Result<Vec<GeneratedPhrase>, StoreError> {
        self.inner.phrases_for(keyword_id).await
    }

    async fn acquire_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, StoreError> {
        self.inner.acquire_lease(domain_id, holder, ttl).await
    }

    async fn renew_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.renew_lease(domain_id, holder, ttl).await
    }

    async fn release_lease(&self, domain_id: &str, holder: &str) -> Result<(), StoreError> {
        self.inner.release_lease(domain_id, holder).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn seeded_store(dir: &TempDir, terms: &[&str]) -> Arc<SqliteStore> {
    let path = dir.path().join("pipeline.db");
    let store = SqliteStore::open(&path.to_string_lossy())
        .await
        .expect("open store");

    store
        .upsert_domain(&Domain {
            id: "d1".into(),
            context: "Project management software for distributed teams.".into(),
            locale: Some("en-US".into()),
        })
        .await
        .unwrap();
    for (idx, term) in terms.iter().enumerate() {
        store
            .upsert_keyword(&Keyword {
                id: format!("k{}", idx + 1),
                domain_id: "d1".into(),
                term: term.to_string(),
            })
            .await
            .unwrap();
    }

    Arc::new(store)
}

fn config() -> PipelineConfig {
    PipelineConfig::default()
        .with_retry(RetryPolicy::immediate(1))
        .with_phrases_per_keyword(PHRASES_PER_KEYWORD)
        .with_lease_ttl(Duration::from_secs(30))
        .with_phase_timeout(Duration::from_secs(5))
}

fn coordinator(
    store: Arc<SqliteStore>,
    executor: Arc<dyn TaskExecutor>,
    config: PipelineConfig,
) -> PipelineCoordinator {
    PipelineCoordinator::new(store.clone(), store, executor, config)
}

async fn run_collect(
    coordinator: &PipelineCoordinator,
    request: RunRequest,
) -> (Result<RunOutcome, PipelineError>, Vec<ProgressEvent>) {
    let (emitter, mut rx) = ProgressEmitter::channel(4096, DisconnectPolicy::Detach);
    let result = coordinator.run(request, emitter).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

fn names(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

fn assert_single_terminal(events: &[ProgressEvent]) {
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "events: {:?}", names(events));
    assert!(events.last().is_some_and(|e| e.is_terminal()));
}

/// Index of the first phase event matching scope, phase and step.
fn position(events: &[ProgressEvent], scope: &str, phase: Phase, step: PhaseStep) -> usize {
    events
        .iter()
        .position(|e| {
            matches!(e, ProgressEvent::Phase { scope_id, phase: p, step: s, .. }
                if scope_id == scope && *p == phase && *s == step)
        })
        .unwrap_or_else(|| panic!("no {:?} {} for {}", step, phase, scope))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_fresh_run_then_idempotent_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.expect("first run succeeds");

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.keywords_total, 2);
    assert_eq!(outcome.keywords_succeeded, 2);
    assert_eq!(outcome.phases_executed, 3 + 2 * 4);
    assert_eq!(outcome.phases_reused, 0);
    assert_eq!(outcome.external_calls, 11);
    assert_eq!(outcome.phrases_written, 2 * PHRASES_PER_KEYWORD);
    assert_eq!(outcome.cost.requests, 11);
    assert_eq!(executor.call_count(), 11);

    assert_eq!(
        executor.calls_for(None),
        vec![
            Phase::SemanticAnalysis,
            Phase::CommunityInsights,
            Phase::CompetitorResearch
        ]
    );
    assert_eq!(executor.calls_for(Some("alpha")), Phase::KEYWORD.to_vec());
    assert_eq!(executor.calls_for(Some("beta")), Phase::KEYWORD.to_vec());

    assert_eq!(names(&events)[0], "run:started");
    assert_eq!(names(&events).last().copied(), Some("run:complete"));
    assert_single_terminal(&events);

    for keyword_id in ["k1", "k2"] {
        let phrases = store.phrases_for(keyword_id).await.unwrap();
        assert_eq!(phrases.len(), PHRASES_PER_KEYWORD);
        assert!(phrases.iter().all(|p| !p.low_confidence));
        assert!(phrases.iter().all(|p| p.intent_label == "commercial"));
        assert!(phrases.iter().all(|p| p.relevance_score == 75));
        let positions: Vec<u32> = phrases.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    let rows = store.list_for_domain("d1").await.unwrap();
    assert_eq!(rows.len(), 11);
    assert!(rows.iter().all(|r| r.status == PhaseStatus::Completed));
    assert!(rows.iter().all(|r| r.input_fingerprint.is_some()));

    // Second run: everything is reused, nothing is called or rewritten.
    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.expect("rerun succeeds");

    assert_eq!(executor.call_count(), 11);
    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.phases_executed, 0);
    assert_eq!(outcome.phases_reused, 11);
    assert_eq!(outcome.external_calls, 0);
    assert_eq!(outcome.phrases_written, 0);
    assert_eq!(
        names(&events)
            .iter()
            .filter(|n| **n == "phase:reused")
            .count(),
        11
    );
    assert!(!names(&events).contains(&"phase:started"));
    assert_eq!(store.phrases_for("k1").await.unwrap().len(), PHRASES_PER_KEYWORD);
}

#[tokio::test]
async fn test_phase_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta", "gamma"]).await;
    let coordinator = coordinator(store, ScriptedExecutor::new(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;
    result.unwrap();

    let last_domain = position(&events, "d1", Phase::CompetitorResearch, PhaseStep::Completed);
    assert!(
        position(&events, "d1", Phase::SemanticAnalysis, PhaseStep::Completed)
            < position(&events, "d1", Phase::CommunityInsights, PhaseStep::Started)
    );

    for keyword_id in ["k1", "k2", "k3"] {
        let search_started = position(&events, keyword_id, Phase::SearchPatterns, PhaseStep::Started);
        let search_done = position(&events, keyword_id, Phase::SearchPatterns, PhaseStep::Completed);
        let phrases_started =
            position(&events, keyword_id, Phase::PhraseGeneration, PhaseStep::Started);
        let intent_started =
            position(&events, keyword_id, Phase::IntentClassification, PhaseStep::Started);
        let scoring_started =
            position(&events, keyword_id, Phase::RelevanceScoring, PhaseStep::Started);

        assert!(last_domain < search_started);
        assert!(search_done < phrases_started);
        assert!(phrases_started < intent_started);
        assert!(intent_started < scoring_started);
    }
}

#[tokio::test]
async fn test_truncated_phrase_output_is_degraded_not_failed() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    executor.truncate(Phase::PhraseGeneration, "alpha");
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.phases_degraded, 1);

    let row = store
        .get(
            &Scope::keyword(&Keyword {
                id: "k1".into(),
                domain_id: "d1".into(),
                term: "alpha".into(),
            }),
            Phase::PhraseGeneration,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, PhaseStatus::Completed);
    assert!(row.degraded);
    let phrases = row.result.unwrap()["phrases"].clone();
    assert_eq!(phrases.as_array().map(|a| a.len()), Some(1));
    assert_eq!(phrases[0]["text"], "best alpha tool");

    let alpha = store.phrases_for("k1").await.unwrap();
    assert_eq!(alpha.len(), 1);
    assert!(alpha[0].low_confidence);

    let beta = store.phrases_for("k2").await.unwrap();
    assert_eq!(beta.len(), PHRASES_PER_KEYWORD);
    assert!(beta.iter().all(|p| !p.low_confidence));

    let completed_payload = events.iter().find_map(|e| match e {
        ProgressEvent::Phase {
            scope_id,
            phase: Phase::PhraseGeneration,
            step: PhaseStep::Completed,
            payload,
            ..
        } if scope_id == "k1" => payload.clone(),
        _ => None,
    });
    assert_eq!(completed_payload.unwrap()["degraded"], Value::Bool(true));
}

#[tokio::test]
async fn test_keyword_failure_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta", "gamma"]).await;
    let executor = ScriptedExecutor::new();
    executor.fail(Phase::SearchPatterns, Some("beta"));
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, RunStatus::PartialSuccess);
    assert_eq!(outcome.keywords_succeeded, 2);
    assert_eq!(outcome.keywords_failed, 1);
    assert_eq!(outcome.failures.len(), 1);
    let failure = &outcome.failures[0];
    assert_eq!(failure.keyword_id, "k2");
    assert_eq!(failure.phase, Phase::SearchPatterns);
    assert_eq!(failure.kind, ErrorKind::PermanentExternal);
    assert!(failure.message.contains("401"));

    // beta stopped at its first phase, the others ran to the end.
    assert_eq!(executor.calls_for(Some("beta")), vec![Phase::SearchPatterns]);
    assert_eq!(executor.calls_for(Some("alpha")), Phase::KEYWORD.to_vec());
    assert_eq!(executor.calls_for(Some("gamma")), Phase::KEYWORD.to_vec());
    assert!(store.phrases_for("k2").await.unwrap().is_empty());
    assert_eq!(store.phrases_for("k3").await.unwrap().len(), PHRASES_PER_KEYWORD);

    let failed_row = store
        .list_for_domain("d1")
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.scope_id == "k2" && r.phase == Phase::SearchPatterns)
        .unwrap();
    assert_eq!(failed_row.status, PhaseStatus::Failed);
    assert!(failed_row.error.unwrap().contains("401"));

    assert!(names(&events).contains(&"keyword:failed"));
    assert_eq!(
        names(&events)
            .iter()
            .filter(|n| **n == "keyword:completed")
            .count(),
        2
    );
    assert_single_terminal(&events);
    match events.last() {
        Some(ProgressEvent::RunComplete { outcome }) => {
            assert_eq!(outcome.failures[0].keyword_id, "k2");
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }

    // Resume: only beta's work is redone.
    executor.clear_failures();
    let before = executor.call_count();
    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(executor.call_count() - before, 4);
    assert_eq!(outcome.phases_reused, 3 + 4 + 4);
    assert_eq!(store.phrases_for("k2").await.unwrap().len(), PHRASES_PER_KEYWORD);
}

#[tokio::test]
async fn test_failed_call_cost_is_counted() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta", "gamma"]).await;
    let executor = ScriptedExecutor::new();
    executor.fail(Phase::SearchPatterns, Some("beta"));
    let coordinator = coordinator(store, executor.clone(), config());

    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    // 3 domain phases, 4 each for alpha and gamma, 1 failed call for beta.
    assert_eq!(executor.call_count(), 12);
    assert_eq!(outcome.external_calls, 12);
    assert_eq!(outcome.cost.requests, 12);
    assert_eq!(outcome.cost.cost_micros, 11 * 10);
    assert_eq!(outcome.cost.input_tokens, 11 * 100);
}

#[tokio::test]
async fn test_all_keywords_failed_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    executor.fail(Phase::PhraseGeneration, Some("alpha"));
    executor.fail(Phase::PhraseGeneration, Some("beta"));
    let coordinator = coordinator(store, executor, config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AllKeywordsFailed);
    assert_single_terminal(&events);
    match events.last() {
        Some(ProgressEvent::RunError {
            kind,
            failed_keywords,
            ..
        }) => {
            assert_eq!(*kind, ErrorKind::AllKeywordsFailed);
            assert_eq!(failed_keywords.len(), 2);
            assert!(failed_keywords
                .iter()
                .all(|f| f.phase == Phase::PhraseGeneration));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_domain_phase_failure_aborts_before_keywords() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    executor.fail(Phase::CommunityInsights, None);
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::PermanentExternal);
    assert_eq!(
        executor.calls_for(None),
        vec![Phase::SemanticAnalysis, Phase::CommunityInsights]
    );
    assert!(executor.calls_for(Some("alpha")).is_empty());
    assert!(executor.calls_for(Some("beta")).is_empty());
    assert_single_terminal(&events);
    assert_eq!(names(&events).last().copied(), Some("run:error"));

    let rows = store.list_for_domain("d1").await.unwrap();
    assert!(rows.iter().all(|r| r.scope_id == "d1"));
}

#[tokio::test]
async fn test_bounded_keyword_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &TERMS).await;
    let executor = ScriptedExecutor::with_delay(Duration::from_millis(25));
    let coordinator = coordinator(
        store,
        executor.clone(),
        config().with_max_concurrent_keywords(2),
    );

    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.keywords_succeeded, 4);
    let peak = executor.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {}", peak);
    assert!(peak >= 1);
}

#[tokio::test]
async fn test_progress_is_monotonic_per_scope_and_phase() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta", "gamma"]).await;
    let coordinator = coordinator(store, ScriptedExecutor::new(), config());

    let (_, first) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let (_, second) = run_collect(&coordinator, RunRequest::new("d1")).await;

    for events in [first, second] {
        let mut last: HashMap<(String, Phase), u8> = HashMap::new();
        for event in &events {
            if let ProgressEvent::Phase {
                scope_id,
                phase,
                progress,
                ..
            } = event
            {
                let previous = last.insert((scope_id.clone(), *phase), *progress);
                if let Some(previous) = previous {
                    assert!(previous <= *progress, "{} {} went backwards", scope_id, phase);
                }
            }
        }
        assert!(last.values().all(|p| *p == 100));
    }
}

#[tokio::test]
async fn test_selected_keywords_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta", "gamma"]).await;
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let request = RunRequest::new("d1").with_keywords(["k3", "k3"]);
    let (result, _) = run_collect(&coordinator, request).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.keywords_total, 1);
    assert!(executor.calls_for(Some("alpha")).is_empty());
    assert_eq!(executor.calls_for(Some("gamma")).len(), 4);
    assert!(store.phrases_for("k1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha"]).await;
    store
        .acquire_lease("d1", "other-run", Duration::from_secs(60))
        .await
        .unwrap();
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(store.clone(), executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("d1")).await;

    match result {
        Err(PipelineError::ConcurrentRunConflict { domain_id, holder }) => {
            assert_eq!(domain_id, "d1");
            assert_eq!(holder, "other-run");
        }
        other => panic!("expected conflict, got {:?}", other.map(|o| o.status)),
    }
    assert_eq!(executor.call_count(), 0);
    assert_eq!(names(&events), vec!["run:error"]);
    assert!(store.list_for_domain("d1").await.unwrap().is_empty());

    // Once the other run lets go, the domain can run again.
    store.release_lease("d1", "other-run").await.unwrap();
    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unknown_domain_and_foreign_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha"]).await;
    store
        .upsert_domain(&Domain {
            id: "d2".into(),
            context: "Another business.".into(),
            locale: None,
        })
        .await
        .unwrap();
    store
        .upsert_keyword(&Keyword {
            id: "other".into(),
            domain_id: "d2".into(),
            term: "beta".into(),
        })
        .await
        .unwrap();
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(store, executor.clone(), config());

    let (result, events) = run_collect(&coordinator, RunRequest::new("missing")).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(names(&events), vec!["run:error"]);

    let request = RunRequest::new("d1").with_keywords(["k1", "other"]);
    let (result, _) = run_collect(&coordinator, request).await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("other"));
    assert_eq!(executor.call_count(), 0);

    // The lease was released after the rejection.
    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_persistence_failure_terminates_run() {
    let dir = tempfile::tempdir().unwrap();
    let inner = seeded_store(&dir, &["alpha", "beta"]).await;
    let store = Arc::new(FailingPhraseStore {
        inner: inner.clone(),
        fail_keyword: "k2",
    });
    let coordinator = PipelineCoordinator::new(store, inner, ScriptedExecutor::new(), config());

    let (emitter, mut rx) = ProgressEmitter::channel(4096, DisconnectPolicy::Detach);
    let result = coordinator.run(RunRequest::new("d1"), emitter).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Persistence);
    assert_single_terminal(&events);
    match events.last() {
        Some(ProgressEvent::RunError {
            kind,
            failed_keywords,
            ..
        }) => {
            assert_eq!(*kind, ErrorKind::Persistence);
            assert!(failed_keywords.iter().any(|f| f.keyword_id == "k2"));
        }
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_detached_run_finishes_without_listener() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    let coordinator = Arc::new(coordinator(store.clone(), executor.clone(), config()));

    let (emitter, rx) = ProgressEmitter::channel(1, DisconnectPolicy::Detach);
    drop(rx);
    let outcome = coordinator
        .spawn_run(RunRequest::new("d1"), emitter)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(executor.call_count(), 11);
    assert_eq!(store.phrases_for("k2").await.unwrap().len(), PHRASES_PER_KEYWORD);
}

#[tokio::test]
async fn test_cancel_policy_stops_work_when_listener_leaves() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha"]).await;
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(store, executor.clone(), config());

    let (emitter, rx) = ProgressEmitter::channel(1, DisconnectPolicy::Cancel);
    drop(rx);
    let result = coordinator.run(RunRequest::new("d1"), emitter).await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert_eq!(executor.call_count(), 0);
}

/// Executor that signals when a call starts and then hangs.
#[derive(Default)]
struct StalledExecutor {
    entered: tokio::sync::Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl TaskExecutor for StalledExecutor {
    async fn execute(
        &self,
        _spec: &TaskSpec,
        _timeout: Duration,
    ) -> Result<TaskOutput, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        tokio::time::sleep(Duration::from_secs(3)).await;
        Err(ExecutorError::Transient {
            attempts: 1,
            message: "stalled call finished".into(),
            cost: CostUnits::failed_request(),
        })
    }
}

#[tokio::test]
async fn test_cancel_policy_abandons_call_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha"]).await;
    let executor = Arc::new(StalledExecutor::default());
    let coordinator = Arc::new(coordinator(store.clone(), executor.clone(), config()));

    let (emitter, mut rx) = ProgressEmitter::channel(64, DisconnectPolicy::Cancel);
    let started = std::time::Instant::now();
    let handle = coordinator.spawn_run(RunRequest::new("d1"), emitter);

    executor.entered.notified().await;
    // Drain what was sent so far, then leave while the call is pending.
    while rx.try_recv().is_ok() {}
    drop(rx);

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run should stop without waiting for the call")
        .unwrap();

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let domain = Scope::domain("d1");
    let row = store
        .get(&domain, Phase::SemanticAnalysis)
        .await
        .unwrap()
        .expect("in-flight phase has a row");
    assert_eq!(row.status, PhaseStatus::Failed);
    assert!(store
        .get(&domain, Phase::CommunityInsights)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_zero_keyword_concurrency_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha", "beta"]).await;
    let executor = ScriptedExecutor::new();
    let coordinator = coordinator(
        store.clone(),
        executor.clone(),
        config().with_max_concurrent_keywords(0),
    );

    let (result, events) = tokio::time::timeout(
        Duration::from_secs(5),
        run_collect(&coordinator, RunRequest::new("d1")),
    )
    .await
    .expect("run should fail fast");

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(names(&events), vec!["run:error"]);
    assert!(store.list_for_domain("d1").await.unwrap().is_empty());
}

// ============================================================================
// Through the real backend executor
// ============================================================================

/// Provider answering by the JSON shape its system prompt asks for. Every
/// second request fails with a 503 first.
struct FlakyProvider {
    calls: AtomicUsize,
}

fn phase_from_system(system: &str) -> Phase {
    if system.contains("\"classifications\"") {
        Phase::IntentClassification
    } else if system.contains("\"scores\"") {
        Phase::RelevanceScoring
    } else if system.contains("\"phrases\"") {
        Phase::PhraseGeneration
    } else if system.contains("\"modifiers\"") {
        Phase::SearchPatterns
    } else if system.contains("\"competitors\"") {
        Phase::CompetitorResearch
    } else if system.contains("\"pain_points\"") {
        Phase::CommunityInsights
    } else {
        Phase::SemanticAnalysis
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call % 2 == 0 {
            return Err(LlmError::ApiError {
                code: 503,
                message: "upstream overloaded".into(),
            });
        }

        let system = request
            .messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let user = request
            .messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let phase = phase_from_system(&system);
        let term = if phase.order() > 3 { term_in(&user) } else { None };

        Ok(GenerationResponse {
            id: format!("resp-{}", call),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(response_for(phase, term)),
                finish_reason: "stop".into(),
            }],
            usage: Usage {
                prompt_tokens: 200,
                completion_tokens: 100,
                total_tokens: 300,
            },
        })
    }
}

#[tokio::test]
async fn test_backend_executor_retries_transient_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir, &["alpha"]).await;
    let provider = Arc::new(FlakyProvider {
        calls: AtomicUsize::new(0),
    });
    let executor = Arc::new(BackendExecutor::new(
        BackendTarget::new(provider.clone(), "openai/gpt-4o-mini"),
        BackendTarget::new(provider.clone(), "perplexity/sonar"),
        RetryPolicy::immediate(3),
    ));
    let coordinator = coordinator(store.clone(), executor, config());

    let (result, _) = run_collect(&coordinator, RunRequest::new("d1")).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.status, RunStatus::Success);
    assert_eq!(outcome.external_calls, 7);
    // Each phase needed two requests: one 503 and one success.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 14);
    assert_eq!(outcome.cost.requests, 14);
    assert_eq!(outcome.cost.input_tokens, 7 * 200);
    assert!(outcome.cost.cost_micros > 0);

    let phrases = store.phrases_for("k1").await.unwrap();
    assert_eq!(phrases.len(), PHRASES_PER_KEYWORD);
    assert_eq!(phrases[0].text, "best alpha tool");
}
