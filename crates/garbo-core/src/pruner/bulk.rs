//! BulkPruner - delete a precomputed candidate set in batches.
//!
//! The candidate keys are computed once, when the cursor opens. Rows that
//! start qualifying later are left for the next run.

use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::domain::{SqlQuery, TargetTable, TaskName};
use crate::error::GarboError;
use crate::ports::{CursorHandle, PruneStore};
use crate::tuner::{ChunkBounds, ChunkTuner, TunableLoop};

pub struct BulkPruner {
    store: Arc<dyn PruneStore>,
    table: TargetTable,
    cursor_name: String,
    cursor: Option<CursorHandle>,
    bounds: ChunkBounds,
    done: bool,
    deleted: u64,
}

impl BulkPruner {
    pub const MAXIMUM_CHUNK_SIZE: f64 = 10_000.0;

    /// Open the candidate cursor for `query`. `query` must return key tuples
    /// in the column order of `table`'s key.
    pub async fn open(
        name: TaskName,
        store: Arc<dyn PruneStore>,
        table: TargetTable,
        query: &SqlQuery,
    ) -> Result<Self, GarboError> {
        let cursor_name = cursor_name(&name);
        let cursor = store.open_cursor(&cursor_name, &table, query).await?;
        tracing::debug!(
            cursor = %cursor_name,
            table = table.name(),
            candidates = cursor.rows(),
            "candidate set computed"
        );
        Ok(Self {
            store,
            table,
            cursor_name,
            cursor: Some(cursor),
            bounds: ChunkBounds::up_to(Self::MAXIMUM_CHUNK_SIZE)?,
            done: false,
            deleted: 0,
        })
    }

    pub fn with_bounds(mut self, bounds: ChunkBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn cursor_name(&self) -> &str {
        &self.cursor_name
    }

    /// Rows deleted so far.
    pub fn deleted(&self) -> u64 {
        self.deleted
    }
}

/// `bulkpruner_<task>_<ulid>`, unique per instance.
fn cursor_name(task: &TaskName) -> String {
    let task: String = task
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("bulkpruner_{task}_{}", Ulid::new().to_string().to_lowercase())
}

#[async_trait]
impl TunableLoop for BulkPruner {
    fn is_done(&self) -> bool {
        self.done
    }

    async fn step(&mut self, chunk_size: f64) -> Result<(), GarboError> {
        let cursor = self
            .cursor
            .as_ref()
            .ok_or_else(|| GarboError::CursorLost(self.cursor_name.clone()))?;
        let batch = self
            .store
            .delete_next_batch(cursor, &self.table, ChunkTuner::batch_size(chunk_size))
            .await?;

        self.deleted += batch.deleted;
        if batch.fetched == 0 {
            self.done = true;
        }
        tracing::debug!(
            table = self.table.name(),
            fetched = batch.fetched,
            deleted = batch.deleted,
            "batch committed"
        );
        Ok(())
    }

    async fn clean_up(&mut self) -> Result<(), GarboError> {
        if let Some(cursor) = self.cursor.take() {
            self.store.close_cursor(cursor).await?;
            tracing::info!(table = self.table.name(), deleted = self.deleted, "removed rows");
        }
        Ok(())
    }

    fn chunk_bounds(&self) -> ChunkBounds {
        self.bounds
    }
}
