use async_trait::async_trait;
use rusqlite::Statement;
use rusqlite::types::ToSql;

use super::{SqliteStore, classify};
use crate::domain::table::quote_ident;
use crate::domain::{KeyColumn, SqlQuery, TargetTable};
use crate::error::GarboError;
use crate::ports::{BatchOutcome, CursorHandle, PruneStore, RangeOutcome};

/// `k0, k1, ...` column list of a cursor table.
fn cursor_columns(arity: usize) -> String {
    (0..arity)
        .map(|i| format!("k{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"id"` for single keys, `("a", "b")` row values for composite keys.
fn target_key_expr(table: &TargetTable) -> String {
    let columns: Vec<String> = table.key().iter().map(|c| quote_ident(&c.name)).collect();
    if columns.len() == 1 {
        columns.join("")
    } else {
        format!("({})", columns.join(", "))
    }
}

fn bind<'a>(query: &'a SqlQuery, extra: &'a [i64]) -> Vec<&'a dyn ToSql> {
    let mut params: Vec<&dyn ToSql> = query.params.iter().map(|p| p as &dyn ToSql).collect();
    params.extend(extra.iter().map(|p| p as &dyn ToSql));
    params
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Bind `:limit` by name and the statement's own parameters, in order, to
/// every other placeholder.
fn bind_chunk(
    stmt: &mut Statement<'_>,
    statement: &SqlQuery,
    limit: usize,
) -> Result<(), GarboError> {
    let limit_index = stmt.parameter_index(":limit")?.ok_or_else(|| {
        GarboError::Config(format!("statement has no :limit parameter: {}", statement.sql))
    })?;
    let mut params = statement.params.iter();
    for index in 1..=stmt.parameter_count() {
        if index == limit_index {
            stmt.raw_bind_parameter(index, limit_param(limit))?;
            continue;
        }
        let value = params.next().ok_or_else(|| {
            GarboError::Config(format!(
                "statement takes more than {} parameters: {}",
                statement.params.len(),
                statement.sql
            ))
        })?;
        stmt.raw_bind_parameter(index, value)?;
    }
    if params.next().is_some() {
        return Err(GarboError::Config(format!(
            "statement takes fewer than {} parameters: {}",
            statement.params.len(),
            statement.sql
        )));
    }
    Ok(())
}

#[async_trait]
impl PruneStore for SqliteStore {
    async fn open_cursor(
        &self,
        name: &str,
        table: &TargetTable,
        query: &SqlQuery,
    ) -> Result<CursorHandle, GarboError> {
        let name = name.to_string();
        let table = table.clone();
        let query = query.clone();
        self.with_connection(move |conn| {
            let cursor = quote_ident(&name);
            let arity = table.key_arity();
            let declared: Vec<String> = table
                .key()
                .iter()
                .enumerate()
                .map(|(i, c)| format!("k{i} {}", c.key_type.as_sql()))
                .collect();

            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "CREATE TEMP TABLE {cursor} (pos INTEGER PRIMARY KEY, {})",
                    declared.join(", ")
                ),
                [],
            )?;
            let rows = tx.execute(
                &format!(
                    "INSERT INTO temp.{cursor} ({}) SELECT * FROM ({})",
                    cursor_columns(arity),
                    query.sql
                ),
                bind(&query, &[]).as_slice(),
            )?;
            tx.commit()?;

            tracing::debug!(cursor = %name, rows, "opened cursor");
            Ok(CursorHandle::new(name, arity, rows as u64))
        })
        .await
    }

    async fn delete_next_batch(
        &self,
        cursor: &CursorHandle,
        table: &TargetTable,
        limit: usize,
    ) -> Result<BatchOutcome, GarboError> {
        let name = cursor.name().to_string();
        let arity = cursor.key_arity();
        let table = table.clone();
        if arity != table.key_arity() {
            return Err(GarboError::Config(format!(
                "cursor {name} has {arity} key columns, table {} has {}",
                table.name(),
                table.key_arity()
            )));
        }
        self.with_connection(move |conn| {
            let cursor = quote_ident(&name);
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_temp_master \
                 WHERE type = 'table' AND name = ?1)",
                [&name],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(GarboError::CursorLost(name));
            }

            let (fetched, last_pos): (i64, Option<i64>) = tx.query_row(
                &format!(
                    "SELECT count(*), max(pos) FROM \
                     (SELECT pos FROM temp.{cursor} ORDER BY pos LIMIT ?1)"
                ),
                [limit_param(limit)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let Some(last_pos) = last_pos else {
                tx.commit()?;
                return Ok(BatchOutcome::default());
            };

            let deleted = tx
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE {} IN \
                         (SELECT {} FROM temp.{cursor} WHERE pos <= ?1)",
                        quote_ident(table.name()),
                        target_key_expr(&table),
                        cursor_columns(arity),
                    ),
                    [last_pos],
                )
                .map_err(classify)?;
            tx.execute(
                &format!("DELETE FROM temp.{cursor} WHERE pos <= ?1"),
                [last_pos],
            )?;
            tx.commit()?;

            Ok(BatchOutcome {
                fetched: fetched as usize,
                deleted: deleted as u64,
            })
        })
        .await
    }

    async fn close_cursor(&self, cursor: CursorHandle) -> Result<(), GarboError> {
        let name = cursor.name().to_string();
        self.with_connection(move |conn| {
            conn.execute(&format!("DROP TABLE IF EXISTS temp.{}", quote_ident(&name)), [])?;
            tracing::debug!(cursor = %name, "closed cursor");
            Ok(())
        })
        .await
    }

    async fn delete_limited(
        &self,
        table: &TargetTable,
        query: &SqlQuery,
        limit: usize,
    ) -> Result<u64, GarboError> {
        let table = table.clone();
        let query = query.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let limit = [limit_param(limit)];
            let deleted = tx
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE {} IN (SELECT * FROM ({}) LIMIT ?)",
                        quote_ident(table.name()),
                        target_key_expr(&table),
                        query.sql
                    ),
                    bind(&query, &limit).as_slice(),
                )
                .map_err(classify)?;
            tx.commit()?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn delete_key_range(
        &self,
        table: &TargetTable,
        key: &KeyColumn,
        predicate: &SqlQuery,
        after: Option<i64>,
        limit: usize,
    ) -> Result<RangeOutcome, GarboError> {
        let table = table.clone();
        let key = quote_ident(&key.name);
        let predicate = predicate.clone();
        self.with_connection(move |conn| {
            let target = quote_ident(table.name());
            let after = after.unwrap_or(i64::MIN);
            let tx = conn.transaction()?;

            let range_params = [after, limit_param(limit)];
            let (scanned, last_key): (i64, Option<i64>) = tx.query_row(
                &format!(
                    "SELECT count(*), max(k) FROM \
                     (SELECT {key} AS k FROM {target} WHERE ({}) AND {key} > ? \
                      ORDER BY {key} LIMIT ?)",
                    predicate.sql
                ),
                bind(&predicate, &range_params).as_slice(),
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let Some(last_key) = last_key else {
                tx.commit()?;
                return Ok(RangeOutcome::default());
            };

            let delete_params = [after, last_key];
            let deleted = tx
                .execute(
                    &format!(
                        "DELETE FROM {target} WHERE ({}) AND {key} > ? AND {key} <= ?",
                        predicate.sql
                    ),
                    bind(&predicate, &delete_params).as_slice(),
                )
                .map_err(classify)?;
            tx.commit()?;

            Ok(RangeOutcome {
                scanned: scanned as usize,
                deleted: deleted as u64,
                last_key: Some(last_key),
            })
        })
        .await
    }

    async fn execute_chunk(&self, statement: &SqlQuery, limit: usize) -> Result<u64, GarboError> {
        let statement = statement.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let done = {
                let mut stmt = tx.prepare(&statement.sql)?;
                bind_chunk(&mut stmt, &statement, limit)?;
                if stmt.column_count() > 0 {
                    let mut rows = stmt.raw_query();
                    match rows.next().map_err(classify)? {
                        Some(row) => row.get::<_, Option<i64>>(0)?.unwrap_or(0).max(0) as u64,
                        None => 0,
                    }
                } else {
                    stmt.raw_execute().map_err(classify)? as u64
                }
            };
            tx.commit()?;
            Ok(done)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SqlValue;

    async fn store_with_foo(rows: i64) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sql = String::from("CREATE TABLE bulkfoo (id INTEGER PRIMARY KEY);");
        for id in 1..=rows {
            sql.push_str(&format!("INSERT INTO bulkfoo (id) VALUES ({id});"));
        }
        store.execute_batch(sql).await.unwrap();
        store
    }

    fn foo() -> TargetTable {
        TargetTable::with_id("bulkfoo").unwrap()
    }

    #[tokio::test]
    async fn cursor_batches_delete_in_key_order() {
        let store = store_with_foo(10).await;
        let query = SqlQuery::new("SELECT id FROM bulkfoo WHERE id < ? ORDER BY id")
            .bind(SqlValue::Integer(6));
        let cursor = store.open_cursor("c1", &foo(), &query).await.unwrap();
        assert_eq!(cursor.rows(), 5);

        let first = store.delete_next_batch(&cursor, &foo(), 2).await.unwrap();
        assert_eq!(first, BatchOutcome { fetched: 2, deleted: 2 });
        assert_eq!(
            store.query_i64("SELECT min(id) FROM bulkfoo").await.unwrap(),
            3
        );

        let rest = store.delete_next_batch(&cursor, &foo(), 100).await.unwrap();
        assert_eq!(rest, BatchOutcome { fetched: 3, deleted: 3 });

        let done = store.delete_next_batch(&cursor, &foo(), 100).await.unwrap();
        assert_eq!(done, BatchOutcome::default());
        assert_eq!(store.query_i64("SELECT count(*) FROM bulkfoo").await.unwrap(), 5);

        store.close_cursor(cursor).await.unwrap();
    }

    #[tokio::test]
    async fn keys_removed_out_of_band_count_as_fetched_not_deleted() {
        let store = store_with_foo(4).await;
        let query = SqlQuery::new("SELECT id FROM bulkfoo ORDER BY id");
        let cursor = store.open_cursor("c2", &foo(), &query).await.unwrap();

        store
            .execute_batch("DELETE FROM bulkfoo WHERE id IN (1, 2)")
            .await
            .unwrap();

        let batch = store.delete_next_batch(&cursor, &foo(), 2).await.unwrap();
        assert_eq!(batch, BatchOutcome { fetched: 2, deleted: 0 });
        let batch = store.delete_next_batch(&cursor, &foo(), 2).await.unwrap();
        assert_eq!(batch, BatchOutcome { fetched: 2, deleted: 2 });
        store.close_cursor(cursor).await.unwrap();
    }

    #[tokio::test]
    async fn closed_cursor_is_lost() {
        let store = store_with_foo(2).await;
        let query = SqlQuery::new("SELECT id FROM bulkfoo");
        let cursor = store.open_cursor("c3", &foo(), &query).await.unwrap();
        store.execute_batch("DROP TABLE temp.c3").await.unwrap();

        let err = store.delete_next_batch(&cursor, &foo(), 1).await.unwrap_err();
        assert!(matches!(err, GarboError::CursorLost(name) if name == "c3"));
    }

    #[tokio::test]
    async fn composite_keys_match_as_row_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE nonce (token INTEGER, nonce TEXT, PRIMARY KEY (token, nonce));
                 INSERT INTO nonce VALUES (1, 'a'), (1, 'b'), (2, 'a');",
            )
            .await
            .unwrap();
        let table = TargetTable::new(
            "nonce",
            vec![
                KeyColumn::integer("token").unwrap(),
                KeyColumn::text("nonce").unwrap(),
            ],
        )
        .unwrap();
        let query = SqlQuery::new("SELECT token, nonce FROM nonce WHERE nonce = ?")
            .bind(SqlValue::Text("a".into()));

        let cursor = store.open_cursor("c4", &table, &query).await.unwrap();
        let batch = store.delete_next_batch(&cursor, &table, 10).await.unwrap();
        assert_eq!(batch.deleted, 2);
        assert_eq!(
            store
                .query_i64("SELECT count(*) FROM nonce WHERE nonce = 'b'")
                .await
                .unwrap(),
            1
        );
        store.close_cursor(cursor).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_key_violation_rolls_back_batch_and_keeps_position() {
        let store = store_with_foo(3).await;
        store
            .execute_batch(
                "CREATE TABLE ref (foo INTEGER REFERENCES bulkfoo (id));
                 INSERT INTO ref VALUES (2);",
            )
            .await
            .unwrap();
        let query = SqlQuery::new("SELECT id FROM bulkfoo ORDER BY id");
        let cursor = store.open_cursor("c5", &foo(), &query).await.unwrap();

        let err = store.delete_next_batch(&cursor, &foo(), 2).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.query_i64("SELECT count(*) FROM bulkfoo").await.unwrap(), 3);

        store.execute_batch("DELETE FROM ref").await.unwrap();
        let batch = store.delete_next_batch(&cursor, &foo(), 2).await.unwrap();
        assert_eq!(batch, BatchOutcome { fetched: 2, deleted: 2 });
        store.close_cursor(cursor).await.unwrap();
    }

    #[tokio::test]
    async fn limited_delete_reevaluates_query() {
        let store = store_with_foo(5).await;
        let query = SqlQuery::new("SELECT id FROM bulkfoo WHERE id > ?").bind(SqlValue::Integer(1));

        assert_eq!(store.delete_limited(&foo(), &query, 3).await.unwrap(), 3);
        assert_eq!(store.delete_limited(&foo(), &query, 3).await.unwrap(), 1);
        assert_eq!(store.delete_limited(&foo(), &query, 3).await.unwrap(), 0);
        assert_eq!(store.query_i64("SELECT count(*) FROM bulkfoo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn key_range_scans_forward_from_resume_point() {
        let store = store_with_foo(10).await;
        let key = KeyColumn::integer("id").unwrap();
        let even = SqlQuery::new("id % 2 = 0");

        let first = store
            .delete_key_range(&foo(), &key, &even, None, 2)
            .await
            .unwrap();
        assert_eq!(first, RangeOutcome { scanned: 2, deleted: 2, last_key: Some(4) });

        let second = store
            .delete_key_range(&foo(), &key, &even, first.last_key, 10)
            .await
            .unwrap();
        assert_eq!(second, RangeOutcome { scanned: 3, deleted: 3, last_key: Some(10) });

        let end = store
            .delete_key_range(&foo(), &key, &even, second.last_key, 10)
            .await
            .unwrap();
        assert_eq!(end, RangeOutcome::default());
        assert_eq!(store.query_i64("SELECT count(*) FROM bulkfoo").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn chunk_statement_binds_limit_and_positional_params() {
        let store = store_with_foo(5).await;
        store
            .execute_batch("ALTER TABLE bulkfoo ADD COLUMN heat INTEGER NOT NULL DEFAULT 0")
            .await
            .unwrap();
        let update = SqlQuery::new(
            "UPDATE bulkfoo SET heat = ? WHERE id IN \
             (SELECT id FROM bulkfoo WHERE heat = 0 AND id > ? LIMIT :limit)",
        )
        .bind(SqlValue::Integer(7))
        .bind(SqlValue::Integer(1));

        assert_eq!(store.execute_chunk(&update, 3).await.unwrap(), 3);
        assert_eq!(store.execute_chunk(&update, 3).await.unwrap(), 1);
        assert_eq!(store.execute_chunk(&update, 3).await.unwrap(), 0);
        assert_eq!(
            store.query_i64("SELECT count(*) FROM bulkfoo WHERE heat = 7").await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn chunk_query_reports_its_first_column() {
        let store = store_with_foo(5).await;
        let query = SqlQuery::new("SELECT count(*) FROM (SELECT id FROM bulkfoo LIMIT :limit)");

        assert_eq!(store.execute_chunk(&query, 2).await.unwrap(), 2);
        assert_eq!(store.execute_chunk(&query, 100).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn chunk_statement_needs_limit_and_matching_params() {
        let store = store_with_foo(1).await;

        let no_limit = SqlQuery::new("DELETE FROM bulkfoo");
        let err = store.execute_chunk(&no_limit, 1).await.unwrap_err();
        assert!(matches!(err, GarboError::Config(_)));

        let missing = SqlQuery::new(
            "DELETE FROM bulkfoo WHERE id IN (SELECT id FROM bulkfoo WHERE id > ? LIMIT :limit)",
        );
        let err = store.execute_chunk(&missing, 1).await.unwrap_err();
        assert!(matches!(err, GarboError::Config(_)));
        assert_eq!(store.query_i64("SELECT count(*) FROM bulkfoo").await.unwrap(), 1);
    }
}
