//! ResumablePruner - key range scan that survives being cut short.
//!
//! Walks a single integer key upwards, deleting rows that match a
//! predicate, and stores the last key it reached in the job state after
//! every batch. The next run continues from there; once the scan reaches
//! the end the resume point is cleared so the run after starts over.
//!
//! Rows that appear below the resume point while a scan is in progress are
//! not revisited until the scan wraps around.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{KeyColumn, KeyType, SqlQuery, TargetTable, TaskName};
use crate::error::GarboError;
use crate::ports::{JobStateStore, PruneStore, load_job_state, save_job_state};
use crate::tuner::{ChunkBounds, ChunkTuner, TunableLoop};

/// Persisted job state of a resumable pruner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub last_key: i64,
}

pub struct ResumablePruner {
    name: TaskName,
    store: Arc<dyn PruneStore>,
    job_state: Arc<dyn JobStateStore>,
    table: TargetTable,
    predicate: SqlQuery,
    last_key: Option<i64>,
    bounds: ChunkBounds,
    done: bool,
    deleted: u64,
}

impl ResumablePruner {
    pub const MAXIMUM_CHUNK_SIZE: f64 = 10_000.0;

    /// `table` must have a single integer key. `predicate` is a boolean SQL
    /// expression over the table's columns.
    pub async fn open(
        name: TaskName,
        store: Arc<dyn PruneStore>,
        job_state: Arc<dyn JobStateStore>,
        table: TargetTable,
        predicate: SqlQuery,
    ) -> Result<Self, GarboError> {
        if !matches!(table.key(), [KeyColumn { key_type: KeyType::Integer, .. }]) {
            return Err(GarboError::Config(format!(
                "{name}: resumable pruning needs a single integer key on {}",
                table.name()
            )));
        }
        let resume: Option<ResumePoint> = load_job_state(job_state.as_ref(), &name).await?;
        let last_key = resume.map(|r| r.last_key);
        if let Some(last_key) = last_key {
            tracing::info!(last_key, "resuming scan");
        }
        Ok(Self {
            name,
            store,
            job_state,
            table,
            predicate,
            last_key,
            bounds: ChunkBounds::up_to(Self::MAXIMUM_CHUNK_SIZE)?,
            done: false,
            deleted: 0,
        })
    }

    pub fn with_bounds(mut self, bounds: ChunkBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn last_key(&self) -> Option<i64> {
        self.last_key
    }

    pub fn deleted(&self) -> u64 {
        self.deleted
    }
}

#[async_trait]
impl TunableLoop for ResumablePruner {
    fn is_done(&self) -> bool {
        self.done
    }

    async fn step(&mut self, chunk_size: f64) -> Result<(), GarboError> {
        let key = &self.table.key()[0];
        let range = self
            .store
            .delete_key_range(
                &self.table,
                key,
                &self.predicate,
                self.last_key,
                ChunkTuner::batch_size(chunk_size),
            )
            .await?;
        self.deleted += range.deleted;

        match range.last_key {
            Some(last_key) if range.scanned > 0 => {
                self.last_key = Some(last_key);
                save_job_state(self.job_state.as_ref(), &self.name, &ResumePoint { last_key })
                    .await?;
            }
            _ => {
                self.done = true;
                self.last_key = None;
                self.job_state.reset(&self.name).await?;
            }
        }
        tracing::debug!(
            table = self.table.name(),
            scanned = range.scanned,
            deleted = range.deleted,
            last_key = ?self.last_key,
            "batch committed"
        );
        Ok(())
    }

    async fn clean_up(&mut self) -> Result<(), GarboError> {
        tracing::info!(table = self.table.name(), deleted = self.deleted, "removed rows");
        Ok(())
    }

    fn chunk_bounds(&self) -> ChunkBounds {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::SqliteStore;

    async fn setup() -> SqliteStore {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        let mut sql = String::from(
            "CREATE TABLE revision_cache (id INTEGER PRIMARY KEY, stale INTEGER NOT NULL);",
        );
        for id in 1..=10 {
            sql.push_str(&format!(
                "INSERT INTO revision_cache VALUES ({id}, {});",
                id % 2
            ));
        }
        sqlite.execute_batch(sql).await.unwrap();
        sqlite
    }

    fn name() -> TaskName {
        TaskName::new("revision-cache-pruner").unwrap()
    }

    async fn open(sqlite: &SqliteStore) -> ResumablePruner {
        ResumablePruner::open(
            name(),
            Arc::new(sqlite.clone()),
            Arc::new(sqlite.clone()),
            TargetTable::with_id("revision_cache").unwrap(),
            SqlQuery::new("stale = 1"),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn interrupted_scan_resumes_from_saved_key() {
        let sqlite = setup().await;

        let mut first = open(&sqlite).await;
        first.step(2.0).await.unwrap();
        assert_eq!(first.last_key(), Some(3));
        assert_eq!(first.deleted(), 2);
        // cut short here; a fresh run picks up after key 3
        drop(first);

        let mut second = open(&sqlite).await;
        assert_eq!(second.last_key(), Some(3));
        while !second.is_done() {
            second.step(2.0).await.unwrap();
        }
        assert_eq!(second.deleted(), 3);
        assert_eq!(
            sqlite
                .query_i64("SELECT count(*) FROM revision_cache WHERE stale = 1")
                .await
                .unwrap(),
            0
        );

        let saved: Option<ResumePoint> = load_job_state(&sqlite, &name()).await.unwrap();
        assert_eq!(saved, None);
    }

    #[tokio::test]
    async fn rows_below_the_resume_point_wait_for_the_next_pass() {
        let sqlite = setup().await;

        let mut first = open(&sqlite).await;
        first.step(3.0).await.unwrap();
        assert_eq!(first.last_key(), Some(5));
        drop(first);

        // becomes stale behind the scan
        sqlite
            .execute_batch("UPDATE revision_cache SET stale = 1 WHERE id = 2")
            .await
            .unwrap();

        let mut second = open(&sqlite).await;
        while !second.is_done() {
            second.step(100.0).await.unwrap();
        }
        assert_eq!(
            sqlite
                .query_i64("SELECT count(*) FROM revision_cache WHERE id = 2")
                .await
                .unwrap(),
            1
        );

        let mut third = open(&sqlite).await;
        assert_eq!(third.last_key(), None);
        while !third.is_done() {
            third.step(100.0).await.unwrap();
        }
        assert_eq!(
            sqlite
                .query_i64("SELECT count(*) FROM revision_cache WHERE id = 2")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn rejects_composite_or_text_keys() {
        let sqlite = SqliteStore::open_in_memory().unwrap();
        let table = TargetTable::new("t", vec![KeyColumn::text("token").unwrap()]).unwrap();
        let result = ResumablePruner::open(
            name(),
            Arc::new(sqlite.clone()),
            Arc::new(sqlite),
            table,
            SqlQuery::new("1"),
        )
        .await;
        assert!(matches!(result, Err(GarboError::Config(_))));
    }
}
