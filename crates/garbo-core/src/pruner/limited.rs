//! LimitedPruner - repeat a `LIMIT`ed delete until nothing matches.
//!
//! No cursor: the candidate query is evaluated again for every chunk, so it
//! should be cheap (e.g. backed by an index on an expiry column).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{SqlQuery, TargetTable};
use crate::error::GarboError;
use crate::ports::PruneStore;
use crate::tuner::{ChunkBounds, ChunkTuner, TunableLoop};

pub struct LimitedPruner {
    store: Arc<dyn PruneStore>,
    table: TargetTable,
    query: SqlQuery,
    bounds: ChunkBounds,
    done: bool,
    deleted: u64,
}

impl LimitedPruner {
    pub const MAXIMUM_CHUNK_SIZE: f64 = 10_000.0;

    pub fn new(
        store: Arc<dyn PruneStore>,
        table: TargetTable,
        query: SqlQuery,
    ) -> Result<Self, GarboError> {
        Ok(Self {
            store,
            table,
            query,
            bounds: ChunkBounds::up_to(Self::MAXIMUM_CHUNK_SIZE)?,
            done: false,
            deleted: 0,
        })
    }

    pub fn with_bounds(mut self, bounds: ChunkBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn deleted(&self) -> u64 {
        self.deleted
    }
}

#[async_trait]
impl TunableLoop for LimitedPruner {
    fn is_done(&self) -> bool {
        self.done
    }

    async fn step(&mut self, chunk_size: f64) -> Result<(), GarboError> {
        let deleted = self
            .store
            .delete_limited(&self.table, &self.query, ChunkTuner::batch_size(chunk_size))
            .await?;
        self.deleted += deleted;
        if deleted == 0 {
            self.done = true;
        }
        tracing::debug!(table = self.table.name(), deleted, "batch committed");
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
