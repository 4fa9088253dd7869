//! Keyword research pipeline.
//!
//! This module provides the coordinator that runs the seven fixed phases over
//! a domain and its keywords, together with the records it reads and writes.
//!
//! # Architecture
//!
//! - **Coordinator**: Orders phases, reuses checkpoints, fans out keywords
//! - **Lease**: Per-domain run lock with a heartbeat
//! - **Phases**: The phase enum and each phase's result shape
//! - **Config**: Concurrency, timeouts, retry policy, models
//!
//! # Pipeline Flow
//!
//! 1. **Lease**: A second run on the same domain is rejected up front
//! 2. **Domain phases**: semantic analysis, community insights, competitor
//!    research, strictly in order
//! 3. **Keyword phases**: search patterns, then the phrase stage (phrase
//!    generation, intent classification, relevance scoring) per keyword
//! 4. **Phrases**: The phrase stage's three results are joined and stored
//!
//! # Example
//!
//! ```rust,ignore
//! use keyword_forge::pipeline::{PipelineConfig, PipelineCoordinator, RunRequest};
//!
//! let coordinator = PipelineCoordinator::new(store.clone(), store, executor, config);
//! let (emitter, mut events) = coordinator.progress_channel();
//!
//! let handle = Arc::new(coordinator).spawn_run(RunRequest::new("acme"), emitter);
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! let outcome = handle.await??;
//! ```
//!
//! # Configuration
//!
//! The pipeline can be configured via the `PipelineConfig` struct or
//! `PIPELINE_*` environment variables (see [`PipelineConfig::from_env`]).

pub mod config;
pub mod coordinator;
pub mod lease;
pub mod outcome;
pub mod phases;
pub mod types;

pub use config::{ConfigError, PipelineConfig};
pub use coordinator::{PipelineCoordinator, RunRequest};
pub use lease::RunLease;
pub use outcome::{KeywordFailure, RunOutcome, RunStatus};
pub use phases::Phase;
pub use types::{
    CheckpointUpdate, Domain, GeneratedPhrase, Keyword, PhaseExecution, PhaseStatus, Scope,
    ScopeKind,
};
