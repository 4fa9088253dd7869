//! Live progress reporting.
//!
//! A run pushes [`ProgressEvent`]s into a caller-owned tokio `mpsc` channel.
//! Events for one scope arrive in the order they were emitted; events of
//! concurrently processed keywords interleave freely. Progress for a
//! (scope, phase) pair is clamped so a consumer never sees it go backwards.
//!
//! When the receiver goes away the [`DisconnectPolicy`] decides what happens:
//! `Detach` keeps working and just stops sending, `Cancel` additionally fires
//! the run's cancellation signal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

use crate::error::ErrorKind;
use crate::pipeline::outcome::{KeywordFailure, RunOutcome};
use crate::pipeline::phases::Phase;
use crate::pipeline::types::{Scope, ScopeKind};

/// Step within a phase's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStep {
    Started,
    Progress,
    Reused,
    Completed,
    Failed,
}

impl PhaseStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStep::Started => "started",
            PhaseStep::Progress => "progress",
            PhaseStep::Reused => "reused",
            PhaseStep::Completed => "completed",
            PhaseStep::Failed => "failed",
        }
    }
}

/// One event on the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: String,
        domain_id: String,
        keyword_count: usize,
    },
    Phase {
        scope_kind: ScopeKind,
        scope_id: String,
        phase: Phase,
        step: PhaseStep,
        progress: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    KeywordFinished {
        keyword_id: String,
        term: String,
        succeeded: bool,
        phrases: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<KeywordFailure>,
    },
    RunComplete {
        outcome: RunOutcome,
    },
    RunError {
        kind: ErrorKind,
        message: String,
        #[serde(default)]
        failed_keywords: Vec<KeywordFailure>,
    },
}

impl ProgressEvent {
    /// Wire name, e.g. `phase:started` or `run:complete`.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::RunStarted { .. } => "run:started",
            ProgressEvent::Phase { step, .. } => match step {
                PhaseStep::Started => "phase:started",
                PhaseStep::Progress => "phase:progress",
                PhaseStep::Reused => "phase:reused",
                PhaseStep::Completed => "phase:completed",
                PhaseStep::Failed => "phase:failed",
            },
            ProgressEvent::KeywordFinished { succeeded: true, .. } => "keyword:completed",
            ProgressEvent::KeywordFinished { .. } => "keyword:failed",
            ProgressEvent::RunComplete { .. } => "run:complete",
            ProgressEvent::RunError { .. } => "run:error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::RunComplete { .. } | ProgressEvent::RunError { .. }
        )
    }
}

/// What to do with in-flight work once the event receiver is dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Stop sending; let running phases finish and persist.
    #[default]
    Detach,
    /// Stop sending and cancel outstanding external calls.
    Cancel,
}

impl std::str::FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detach" => Ok(DisconnectPolicy::Detach),
            "cancel" => Ok(DisconnectPolicy::Cancel),
            other => Err(format!("unknown disconnect policy '{}'", other)),
        }
    }
}

/// Receiving half of the run-wide cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation fires. Never resolves otherwise.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

struct EmitterInner {
    tx: Option<mpsc::Sender<ProgressEvent>>,
    policy: DisconnectPolicy,
    closed: AtomicBool,
    last_progress: Mutex<HashMap<(String, Phase), u8>>,
    cancel: watch::Sender<bool>,
}

/// Push side of the progress stream. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressEmitter {
    inner: Arc<EmitterInner>,
}

impl ProgressEmitter {
    /// Create an emitter and the receiver the caller listens on.
    pub fn channel(
        capacity: usize,
        policy: DisconnectPolicy,
    ) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::with_sender(Some(tx), policy), rx)
    }

    /// An emitter nobody listens to.
    pub fn detached() -> Self {
        Self::with_sender(None, DisconnectPolicy::Detach)
    }

    fn with_sender(tx: Option<mpsc::Sender<ProgressEvent>>, policy: DisconnectPolicy) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(EmitterInner {
                tx,
                policy,
                closed: AtomicBool::new(false),
                last_progress: Mutex::new(HashMap::new()),
                cancel,
            }),
        }
    }

    pub fn policy(&self) -> DisconnectPolicy {
        self.inner.policy
    }

    /// True once the receiver has been observed as dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn cancellation(&self) -> CancelSignal {
        CancelSignal(self.inner.cancel.subscribe())
    }

    /// Fire the run-wide cancellation signal.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// Resolves once the run is cancelled. Under `Cancel` a dropped receiver
    /// counts even when no send has failed yet, so an external call that is
    /// already in flight can be abandoned.
    pub async fn cancelled(&self) {
        let mut signal = self.cancellation();
        let receiver_dropped = async {
            match (&self.inner.tx, self.inner.policy) {
                (Some(tx), DisconnectPolicy::Cancel) => {
                    tx.closed().await;
                    self.mark_closed("receiver_dropped");
                }
                _ => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = signal.cancelled() => {}
            _ = receiver_dropped => {}
        }
    }

    /// Emit a phase step for `scope`. Progress is clamped to the highest
    /// value already emitted for the same (scope, phase).
    pub async fn emit(
        &self,
        scope: &Scope,
        phase: Phase,
        step: PhaseStep,
        progress: u8,
        payload: Option<Value>,
    ) {
        let progress = self.clamp_progress(&scope.id, phase, progress.min(100));
        self.send(ProgressEvent::Phase {
            scope_kind: scope.kind,
            scope_id: scope.id.clone(),
            phase,
            step,
            progress,
            payload,
        })
        .await;
    }

    fn clamp_progress(&self, scope_id: &str, phase: Phase, progress: u8) -> u8 {
        let mut last = match self.inner.last_progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = last.entry((scope_id.to_string(), phase)).or_insert(0);
        *entry = (*entry).max(progress);
        *entry
    }

    /// Send an event unless the receiver is gone.
    pub async fn send(&self, event: ProgressEvent) {
        let Some(tx) = &self.inner.tx else {
            return;
        };
        if self.is_closed() {
            return;
        }

        let name = event.name();
        if tx.send(event).await.is_err() {
            self.mark_closed(name);
        }
    }

    fn mark_closed(&self, event_name: &str) {
        if self.inner.policy == DisconnectPolicy::Cancel {
            self.cancel();
        }
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.policy {
            DisconnectPolicy::Detach => {
                tracing::info!(
                    event = event_name,
                    "Progress receiver dropped, continuing run detached"
                );
            }
            DisconnectPolicy::Cancel => {
                tracing::warn!(
                    event = event_name,
                    "Progress receiver dropped, cancelling run"
                );
            }
        }
    }
}
