//! Checkpoint store: durable per-(item, phase) completion records
//!
//! The single source of truth for resume and retry decisions. Every status
//! transition is one SQLite statement, so a write is durable before the call
//! returns and a reader never observes a half-written record, including
//! after a crash. Workers share the pool; SQLite serializes the writes.

use crate::models::{ItemId, Phase, PhaseStatus};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Checkpoint store errors. Database failures abort the run: proceeding
/// with unconfirmed state would corrupt crash recovery.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Reset refused: only failed records may be rewound
    #[error("Cannot reset {item} phase {phase}: status is {status}")]
    InvalidReset {
        item: ItemId,
        phase: Phase,
        status: PhaseStatus,
    },

    #[error("Corrupt phase record: {0}")]
    Corrupt(String),
}

/// Durable, per-item, per-phase record of completion and failure
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint database at the given path
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to checkpoint database: {}", db_url);
        let pool = SqlitePool::connect(&db_url).await?;
        let store = CheckpointStore { pool };
        store.init_tables().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        let store = CheckpointStore { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS phase_records (
                item_id TEXT NOT NULL,
                phase INTEGER NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                result_ref TEXT,
                error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (item_id, phase)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a phase as running. Created on first dispatch; the attempt
    /// counter survives resets so retry history is visible.
    pub async fn record_start(&self, item: &ItemId, phase: Phase) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO phase_records (item_id, phase, status, attempts, updated_at)
            VALUES (?, ?, 'running', 1, ?)
            ON CONFLICT(item_id, phase) DO UPDATE SET
                status = 'running',
                attempts = attempts + 1,
                error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.as_str())
        .bind(phase.number() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a phase as succeeded, with an optional artifact reference
    pub async fn record_success(
        &self,
        item: &ItemId,
        phase: Phase,
        result_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO phase_records (item_id, phase, status, attempts, result_ref, updated_at)
            VALUES (?, ?, 'succeeded', 1, ?, ?)
            ON CONFLICT(item_id, phase) DO UPDATE SET
                status = 'succeeded',
                result_ref = excluded.result_ref,
                error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.as_str())
        .bind(phase.number() as i64)
        .bind(result_ref)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a phase as failed with error detail
    pub async fn record_failure(
        &self,
        item: &ItemId,
        phase: Phase,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO phase_records (item_id, phase, status, attempts, error, updated_at)
            VALUES (?, ?, 'failed', 1, ?, ?)
            ON CONFLICT(item_id, phase) DO UPDATE SET
                status = 'failed',
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.as_str())
        .bind(phase.number() as i64)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Current status of one phase; `Pending` when no record exists
    pub async fn status(&self, item: &ItemId, phase: Phase) -> Result<PhaseStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM phase_records WHERE item_id = ? AND phase = ?")
            .bind(item.as_str())
            .bind(phase.number() as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => parse_status(&row.get::<String, _>("status")),
            None => Ok(PhaseStatus::Pending),
        }
    }

    /// All recorded statuses for one item
    pub async fn statuses(&self, item: &ItemId) -> Result<HashMap<Phase, PhaseStatus>, StoreError> {
        let rows = sqlx::query("SELECT phase, status FROM phase_records WHERE item_id = ?")
            .bind(item.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::new();
        for row in rows {
            let number: i64 = row.get("phase");
            let phase = Phase::from_number(number as u8)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown phase {}", number)))?;
            map.insert(phase, parse_status(&row.get::<String, _>("status"))?);
        }
        Ok(map)
    }

    /// Artifact reference stored with a succeeded phase
    pub async fn result_ref(
        &self,
        item: &ItemId,
        phase: Phase,
    ) -> Result<Option<String>, StoreError> {
        let row =
            sqlx::query("SELECT result_ref FROM phase_records WHERE item_id = ? AND phase = ?")
                .bind(item.as_str())
                .bind(phase.number() as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("result_ref")))
    }

    /// All (item, phase) pairs currently marked failed. Retry-failed is a
    /// pure filter over this set, never inferred from artifact absence.
    pub async fn failed_records(&self) -> Result<Vec<(ItemId, Phase)>, StoreError> {
        let rows = sqlx::query(
            "SELECT item_id, phase FROM phase_records WHERE status = 'failed' ORDER BY item_id, phase",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut failed = Vec::with_capacity(rows.len());
        for row in rows {
            let number: i64 = row.get("phase");
            let phase = Phase::from_number(number as u8)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown phase {}", number)))?;
            failed.push((ItemId::new(row.get::<String, _>("item_id")), phase));
        }
        Ok(failed)
    }

    /// Clear a failed record back to pending. The only retry primitive;
    /// refuses to rewind a record in any other state.
    pub async fn reset(&self, item: &ItemId, phase: Phase) -> Result<(), StoreError> {
        let current = self.status(item, phase).await?;
        if current != PhaseStatus::Failed {
            return Err(StoreError::InvalidReset {
                item: item.clone(),
                phase,
                status: current,
            });
        }

        sqlx::query(
            r#"
            UPDATE phase_records
            SET status = 'pending', error = NULL, updated_at = ?
            WHERE item_id = ? AND phase = ? AND status = 'failed'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(item.as_str())
        .bind(phase.number() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Crash recovery: any record still `running` whose last update is older
    /// than the staleness window belongs to a dead process. The store is the
    /// sole truth (no lock service), so these rewind to pending at startup.
    pub async fn recover_stale_running(
        &self,
        staleness: chrono::Duration,
    ) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - staleness).to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE phase_records
            SET status = 'pending', updated_at = ?
            WHERE status = 'running' AND updated_at < ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected() as usize;
        if recovered > 0 {
            info!(recovered, "Recovered stale running records from a previous run");
        }
        Ok(recovered)
    }

    /// Per-item final status summary at end of run
    pub async fn failure_count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM phase_records WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

fn parse_status(s: &str) -> Result<PhaseStatus, StoreError> {
    PhaseStatus::parse(s).ok_or_else(|| {
        warn!(status = s, "Unparseable status in phase_records");
        StoreError::Corrupt(format!("unknown status {:?}", s))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> ItemId {
        ItemId::new(name)
    }

    #[tokio::test]
    async fn test_absent_record_is_pending() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let status = store.status(&item("a.mp4"), Phase::Deep).await.unwrap();
        assert_eq!(status, PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_lifecycle_start_success() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let id = item("a.mp4");

        store.record_start(&id, Phase::Proxy).await.unwrap();
        assert_eq!(
            store.status(&id, Phase::Proxy).await.unwrap(),
            PhaseStatus::Running
        );

        store
            .record_success(&id, Phase::Proxy, Some("proxies/a.manifest.json"))
            .await
            .unwrap();
        assert_eq!(
            store.status(&id, Phase::Proxy).await.unwrap(),
            PhaseStatus::Succeeded
        );
        assert_eq!(
            store.result_ref(&id, Phase::Proxy).await.unwrap().as_deref(),
            Some("proxies/a.manifest.json")
        );
    }

    #[tokio::test]
    async fn test_reset_only_applies_to_failed() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let id = item("a.mp4");

        store.record_start(&id, Phase::Deep).await.unwrap();
        store.record_failure(&id, Phase::Deep, "boom").await.unwrap();
        store.reset(&id, Phase::Deep).await.unwrap();
        assert_eq!(
            store.status(&id, Phase::Deep).await.unwrap(),
            PhaseStatus::Pending
        );

        // A succeeded phase must never be rewound by reset
        store.record_start(&id, Phase::Proxy).await.unwrap();
        store.record_success(&id, Phase::Proxy, None).await.unwrap();
        assert!(matches!(
            store.reset(&id, Phase::Proxy).await,
            Err(StoreError::InvalidReset { .. })
        ));
        assert_eq!(
            store.status(&id, Phase::Proxy).await.unwrap(),
            PhaseStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_failed_records_is_exact_filter() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let a = item("a.mp4");
        let b = item("b.mp4");

        store.record_start(&a, Phase::Proxy).await.unwrap();
        store.record_success(&a, Phase::Proxy, None).await.unwrap();
        store.record_start(&a, Phase::Prescan).await.unwrap();
        store.record_failure(&a, Phase::Prescan, "x").await.unwrap();
        store.record_start(&b, Phase::Proxy).await.unwrap();
        store.record_failure(&b, Phase::Proxy, "y").await.unwrap();

        let failed = store.failed_records().await.unwrap();
        assert_eq!(
            failed,
            vec![(a.clone(), Phase::Prescan), (b.clone(), Phase::Proxy)]
        );
        assert_eq!(store.failure_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_running_recovery() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let id = item("a.mp4");
        store.record_start(&id, Phase::Deep).await.unwrap();

        // Fresh running record is left alone
        let recovered = store
            .recover_stale_running(chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(recovered, 0);

        // Zero-width staleness treats any running record as stale
        let recovered = store
            .recover_stale_running(chrono::Duration::seconds(-1))
            .await
            .unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(
            store.status(&id, Phase::Deep).await.unwrap(),
            PhaseStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_attempts_accumulate_across_resets() {
        let store = CheckpointStore::in_memory().await.unwrap();
        let id = item("a.mp4");

        store.record_start(&id, Phase::Deep).await.unwrap();
        store.record_failure(&id, Phase::Deep, "x").await.unwrap();
        store.reset(&id, Phase::Deep).await.unwrap();
        store.record_start(&id, Phase::Deep).await.unwrap();
        store.record_success(&id, Phase::Deep, None).await.unwrap();

        let statuses = store.statuses(&id).await.unwrap();
        assert_eq!(statuses.get(&Phase::Deep), Some(&PhaseStatus::Succeeded));
    }
}
