//! SQLite-backed checkpoint store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use super::migrations::MigrationRunner;
use super::{CheckpointStore, DomainSource, LeaseAcquisition};
use crate::error::StoreError;
use crate::pipeline::phases::Phase;
use crate::pipeline::types::{
    CheckpointUpdate, Domain, GeneratedPhrase, Keyword, PhaseExecution, PhaseStatus, Scope,
    ScopeKind,
};

const UPSERT_PHASE_SQL: &str = r#"
INSERT INTO phase_executions (
    scope_id, phase, phase_order, scope_kind, domain_id, status, progress,
    result, degraded, error, input_fingerprint, started_at, ended_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
ON CONFLICT(scope_id, phase) DO UPDATE SET
    status = excluded.status,
    progress = CASE
        WHEN excluded.status = 'running' AND phase_executions.status = 'running'
            THEN MAX(phase_executions.progress, excluded.progress)
        ELSE excluded.progress
    END,
    result = excluded.result,
    degraded = excluded.degraded,
    error = excluded.error,
    input_fingerprint = COALESCE(excluded.input_fingerprint, phase_executions.input_fingerprint),
    started_at = CASE
        WHEN excluded.status = 'running' AND phase_executions.status <> 'running'
            THEN excluded.started_at
        ELSE COALESCE(phase_executions.started_at, excluded.started_at)
    END,
    ended_at = excluded.ended_at,
    updated_at = excluded.updated_at
"#;

const ACQUIRE_LEASE_SQL: &str = r#"
INSERT INTO run_leases (domain_id, holder, acquired_at_ms, expires_at_ms)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(domain_id) DO UPDATE SET
    holder = excluded.holder,
    acquired_at_ms = excluded.acquired_at_ms,
    expires_at_ms = excluded.expires_at_ms
WHERE run_leases.expires_at_ms <= excluded.acquired_at_ms
   OR run_leases.holder = excluded.holder
"#;

/// Checkpoint store and domain source on a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply migrations.
    ///
    /// Accepts `sqlite://path`, `sqlite::memory:` or a bare file path.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        MigrationRunner::new(pool.clone()).run_migrations().await?;

        tracing::info!(database = %url, "Checkpoint store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a domain. Used by the `seed` command.
    pub async fn upsert_domain(&self, domain: &Domain) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO domains (id, context, locale) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET context = excluded.context, locale = excluded.locale",
        )
        .bind(&domain.id)
        .bind(&domain.context)
        .bind(&domain.locale)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update a keyword. Used by the `seed` command.
    pub async fn upsert_keyword(&self, keyword: &Keyword) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO keywords (id, domain_id, term) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET domain_id = excluded.domain_id, term = excluded.term",
        )
        .bind(&keyword.id)
        .bind(&keyword.domain_id)
        .bind(&keyword.term)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of checkpoint rows for a domain and its keywords.
    pub async fn count_executions(&self, domain_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM phase_executions WHERE domain_id = ?1")
                .bind(domain_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn invalid(field: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRecord(format!("{}: {}", field, err))
}

fn execution_from_row(row: &SqliteRow) -> Result<PhaseExecution, StoreError> {
    let phase: String = row.try_get("phase")?;
    let scope_kind: String = row.try_get("scope_kind")?;
    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;
    let progress: i64 = row.try_get("progress")?;
    let degraded: i64 = row.try_get("degraded")?;

    Ok(PhaseExecution {
        scope_id: row.try_get("scope_id")?,
        scope_kind: ScopeKind::from_str(&scope_kind).map_err(|e| invalid("scope_kind", e))?,
        domain_id: row.try_get("domain_id")?,
        phase: Phase::from_str(&phase).map_err(|e| invalid("phase", e))?,
        status: PhaseStatus::from_str(&status).map_err(|e| invalid("status", e))?,
        progress: progress.clamp(0, 100) as u8,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        degraded: degraded != 0,
        error: row.try_get("error")?,
        input_fingerprint: row.try_get("input_fingerprint")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        ended_at: row.try_get::<Option<DateTime<Utc>>, _>("ended_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn phrase_from_row(row: &SqliteRow) -> Result<GeneratedPhrase, StoreError> {
    let source_tags: String = row.try_get("source_tags")?;
    let position: i64 = row.try_get("position")?;
    let relevance_score: i64 = row.try_get("relevance_score")?;
    let low_confidence: i64 = row.try_get("low_confidence")?;

    Ok(GeneratedPhrase {
        keyword_id: row.try_get("keyword_id")?,
        position: u32::try_from(position).map_err(|e| invalid("position", e))?,
        text: row.try_get("text")?,
        intent_label: row.try_get("intent_label")?,
        intent_confidence: row.try_get("intent_confidence")?,
        relevance_score: relevance_score.clamp(0, 100) as u8,
        source_tags: serde_json::from_str(&source_tags)?,
        trend_label: row.try_get("trend_label")?,
        low_confidence: low_confidence != 0,
    })
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get(&self, scope: &Scope, phase: Phase) -> Result<Option<PhaseExecution>, StoreError> {
        let row = sqlx::query("SELECT * FROM phase_executions WHERE scope_id = ?1 AND phase = ?2")
            .bind(&scope.id)
            .bind(phase.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    async fn put(
        &self,
        scope: &Scope,
        phase: Phase,
        update: CheckpointUpdate,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let started_at = (update.status == PhaseStatus::Running).then_some(now);
        let ended_at = update.status.is_terminal().then_some(now);
        let result = update
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(UPSERT_PHASE_SQL)
            .bind(&scope.id)
            .bind(phase.as_str())
            .bind(i64::from(phase.order()))
            .bind(scope.kind.as_str())
            .bind(&scope.domain_id)
            .bind(update.status.as_str())
            .bind(i64::from(update.progress.min(100)))
            .bind(result)
            .bind(update.degraded as i64)
            .bind(&update.error)
            .bind(&update.input_fingerprint)
            .bind(started_at)
            .bind(ended_at)
            .bind(now)
            .execute(&self.pool)
            .await?;

        tracing::trace!(
            scope = %scope,
            phase = %phase,
            status = %update.status,
            progress = update.progress,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn completed_for(&self, scope: &Scope) -> Result<Vec<PhaseExecution>, StoreError> {
        let keyword_id = match scope.kind {
            ScopeKind::Keyword => Some(scope.id.as_str()),
            ScopeKind::Domain => None,
        };

        let rows = sqlx::query(
            "SELECT * FROM phase_executions
             WHERE status = 'completed'
               AND ((scope_kind = 'domain' AND scope_id = ?1)
                 OR (scope_kind = 'keyword' AND scope_id = ?2))
             ORDER BY phase_order",
        )
        .bind(&scope.domain_id)
        .bind(keyword_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn list_for_domain(&self, domain_id: &str) -> Result<Vec<PhaseExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM phase_executions
             WHERE domain_id = ?1
             ORDER BY CASE scope_kind WHEN 'domain' THEN 0 ELSE 1 END, scope_id, phase_order",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn replace_phrases(
        &self,
        keyword_id: &str,
        phrases: &[GeneratedPhrase],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM generated_phrases WHERE keyword_id = ?1")
            .bind(keyword_id)
            .execute(&mut *tx)
            .await?;

        for phrase in phrases {
            sqlx::query(
                "INSERT INTO generated_phrases (
                    keyword_id, position, text, intent_label, intent_confidence,
                    relevance_score, source_tags, trend_label, low_confidence
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(keyword_id)
            .bind(i64::from(phrase.position))
            .bind(&phrase.text)
            .bind(&phrase.intent_label)
            .bind(phrase.intent_confidence)
            .bind(i64::from(phrase.relevance_score))
            .bind(serde_json::to_string(&phrase.source_tags)?)
            .bind(&phrase.trend_label)
            .bind(phrase.low_confidence as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            keyword_id = keyword_id,
            count = phrases.len(),
            "Replaced generated phrases"
        );
        Ok(())
    }

    async fn phrases_for(&self, keyword_id: &str) -> Result<Vec<GeneratedPhrase>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM generated_phrases WHERE keyword_id = ?1 ORDER BY position")
                .bind(keyword_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(phrase_from_row).collect()
    }

    async fn acquire_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<LeaseAcquisition, StoreError> {
        let now_ms = Utc::now().timestamp_millis();
        let expires_at_ms = now_ms.saturating_add(ttl_millis(ttl));

        let result = sqlx::query(ACQUIRE_LEASE_SQL)
            .bind(domain_id)
            .bind(holder)
            .bind(now_ms)
            .bind(expires_at_ms)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            return Ok(LeaseAcquisition::Acquired);
        }

        let current: Option<(String, i64)> =
            sqlx::query_as("SELECT holder, expires_at_ms FROM run_leases WHERE domain_id = ?1")
                .bind(domain_id)
                .fetch_optional(&self.pool)
                .await?;

        match current {
            Some((holder, expires_at_ms)) => Ok(LeaseAcquisition::Held {
                holder,
                expires_at_ms,
            }),
            // Released between the two statements; the caller may simply retry.
            None => Ok(LeaseAcquisition::Held {
                holder: "unknown".to_string(),
                expires_at_ms: now_ms,
            }),
        }
    }

    async fn renew_lease(
        &self,
        domain_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let expires_at_ms = Utc::now().timestamp_millis().saturating_add(ttl_millis(ttl));
        let result = sqlx::query(
            "UPDATE run_leases SET expires_at_ms = ?1 WHERE domain_id = ?2 AND holder = ?3",
        )
        .bind(expires_at_ms)
        .bind(domain_id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, domain_id: &str, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM run_leases WHERE domain_id = ?1 AND holder = ?2")
            .bind(domain_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DomainSource for SqliteStore {
    async fn load_domain(&self, domain_id: &str) -> Result<Option<Domain>, StoreError> {
        let row = sqlx::query("SELECT id, context, locale FROM domains WHERE id = ?1")
            .bind(domain_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Domain {
                id: row.try_get("id")?,
                context: row.try_get("context")?,
                locale: row.try_get("locale")?,
            })
        })
        .transpose()
    }

    async fn load_keywords(&self, domain_id: &str) -> Result<Vec<Keyword>, StoreError> {
        let rows =
            sqlx::query("SELECT id, domain_id, term FROM keywords WHERE domain_id = ?1 ORDER BY id")
                .bind(domain_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                Ok(Keyword {
                    id: row.try_get("id")?,
                    domain_id: row.try_get("domain_id")?,
                    term: row.try_get("term")?,
                })
            })
            .collect()
    }
}
