//! Durable checkpoint storage.
//!
//! # Overview
//!
//! - [`CheckpointStore`]: one row per (scope, phase), upserted in place. This is
//!   what makes a run resumable: completed rows are reused instead of
//!   recomputed. It also holds generated phrases and per-domain run leases.
//! - [`DomainSource`]: read access to the domains and keywords created
//!   upstream.
//! - [`SqliteStore`]: the sqlx/SQLite implementation of both.
//!
//! # Usage
//!
//! ```rust,ignore
//! use keyword_forge::storage::{CheckpointStore, SqliteStore};
//!
//! let store = SqliteStore::open("sqlite://keyword_forge.db").await?;
//! let row = store.get(&Scope::domain("d1"), Phase::SemanticAnalysis).await?;
//! ```

pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use migrations::{AppliedMigration, MigrationRunner};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;
use crate::pipeline::phases::Phase;
use crate::pipeline::types::{
    CheckpointUpdate, Domain, GeneratedPhrase, Keyword, PhaseExecution, Scope,
};

/// Outcome of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquisition {
    Acquired,
    /// Another holder owns an unexpired lease.
    Held { holder: String, expires_at_ms: i64 },
}

/// Persistence contract for phase checkpoints, phrases and run leases.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Fetch the checkpoint for `(scope, phase)`, if one was ever written.
    async fn get(&self, scope: &Scope, phase: Phase) -> Result<Option<PhaseExecution>, StoreError>;

    /// Upsert the checkpoint for `(scope, phase)`.
    ///
    /// While the row stays `running`, stored progress never decreases.
    async fn put(
        &self,
        scope: &Scope,
        phase: Phase,
        update: CheckpointUpdate,
    ) -> Result<(), StoreError>;

    /// Completed rows visible to `scope`, ordered by phase.
    ///
    /// For a keyword scope this includes the owning domain's rows.
    async fn completed_for(&self, scope: &Scope) -> Result<Vec<PhaseExecution>, StoreError>;

    /// Every row of a domain and its keywords, ordered by scope then phase.
    async fn list_for_domain(&self, domain_id: &str) -> Result<Vec<PhaseExecution>, StoreError>;

    /// Atomically replace all phrases of a keyword.
    async fn replace_phrases(
        &self,
        keyword_id: &str,
        phrases: &[GeneratedPhrase],
    ) -> Result<(), StoreError>;

    /// Phrases of a keyword, ordered by position.
    async fn phrases_for(&self, keyword_id: &str) -> Result<Vec<GeneratedPhrase>, StoreError>;

    /// Take the run lease for a domain unless an unexpired one is held by
    /// someone else. Re-acquiring your own lease extends it.
    async fn acquire_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, StoreError>;

    /// Push the expiry forward. Returns false if `holder` no longer owns it.
    async fn renew_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn release_lease(&self, domain_id: &str, holder: &str) -> Result<(), StoreError>;
}

/// Read access to upstream domain and keyword records.
#[async_trait]
pub trait DomainSource: Send + Sync {
    async fn load_domain(&self, domain_id: &str) -> Result<Option<Domain>, StoreError>;

    /// All keywords of a domain, ordered by id.
    async fn load_keywords(&self, domain_id: &str) -> Result<Vec<Keyword>, StoreError>;
}
