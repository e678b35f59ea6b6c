//! PruneStore port - the storage operations the maintenance loops need.
//!
//! Every method runs in (and commits) its own transaction. The only state
//! that outlives a transaction is a holdable cursor opened by
//! [`PruneStore::open_cursor`].

use async_trait::async_trait;

use crate::domain::{KeyColumn, SqlQuery, TargetTable};
use crate::error::GarboError;

/// Handle of a holdable cursor over a candidate-key query.
///
/// Not `Clone`: the pruner that opened it owns it and hands it back to
/// [`PruneStore::close_cursor`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct CursorHandle {
    name: String,
    key_arity: usize,
    rows: u64,
}

impl CursorHandle {
    pub fn new(name: impl Into<String>, key_arity: usize, rows: u64) -> Self {
        Self {
            name: name.into(),
            key_arity,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_arity(&self) -> usize {
        self.key_arity
    }

    /// Number of candidate keys computed when the cursor was opened.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Result of one fetch-and-delete batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    /// Keys taken from the cursor. Zero means the cursor is exhausted.
    pub fetched: usize,

    /// Target rows actually deleted (keys already gone count as zero).
    pub deleted: u64,
}

/// Result of one key-range batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeOutcome {
    /// Rows matched in the scanned range. Zero means the end was reached.
    pub scanned: usize,

    pub deleted: u64,

    /// Highest key in the scanned range, i.e. the next resume point.
    pub last_key: Option<i64>,
}

#[async_trait]
pub trait PruneStore: Send + Sync {
    /// Evaluate `query` once and keep its key tuples in a cursor named
    /// `name` that stays valid across subsequent transactions.
    async fn open_cursor(
        &self,
        name: &str,
        table: &TargetTable,
        query: &SqlQuery,
    ) -> Result<CursorHandle, GarboError>;

    /// Take the next `limit` keys from the cursor and delete the matching
    /// rows of `table` in a single transaction.
    ///
    /// If the delete fails the transaction is rolled back and the cursor
    /// position is left where it was.
    async fn delete_next_batch(
        &self,
        cursor: &CursorHandle,
        table: &TargetTable,
        limit: usize,
    ) -> Result<BatchOutcome, GarboError>;

    async fn close_cursor(&self, cursor: CursorHandle) -> Result<(), GarboError>;

    /// Delete at most `limit` rows of `table` whose key is returned by
    /// `query`. The query is re-evaluated on every call.
    async fn delete_limited(
        &self,
        table: &TargetTable,
        query: &SqlQuery,
        limit: usize,
    ) -> Result<u64, GarboError>;

    /// Delete rows with `key > after` matching `predicate`, at most `limit`
    /// of them in key order.
    async fn delete_key_range(
        &self,
        table: &TargetTable,
        key: &KeyColumn,
        predicate: &SqlQuery,
        after: Option<i64>,
        limit: usize,
    ) -> Result<RangeOutcome, GarboError>;

    /// Run one chunk of `statement` with `:limit` bound to `limit` and
    /// return how much work it did: the affected row count, or the first
    /// column of the first row for statements that return rows.
    async fn execute_chunk(&self, statement: &SqlQuery, limit: usize) -> Result<u64, GarboError>;
}
