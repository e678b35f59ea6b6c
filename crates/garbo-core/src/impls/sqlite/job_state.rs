use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::SqliteStore;
use crate::domain::TaskName;
use crate::error::GarboError;
use crate::ports::JobStateStore;

#[async_trait]
impl JobStateStore for SqliteStore {
    async fn load(&self, name: &TaskName) -> Result<Option<serde_json::Value>, GarboError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT json_data FROM garbo_job_state WHERE name = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save(&self, name: &TaskName, value: &serde_json::Value) -> Result<(), GarboError> {
        let name = name.to_string();
        let json = serde_json::to_string(value)?;
        self.with_connection(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE garbo_job_state SET json_data = ?1, updated_at = ?2 WHERE name = ?3",
                params![json, now, name],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO garbo_job_state (name, json_data, updated_at) VALUES (?1, ?2, ?3)",
                    params![name, json, now],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn reset(&self, name: &TaskName) -> Result<(), GarboError> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM garbo_job_state WHERE name = ?1", [&name])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{load_job_state, save_job_state};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[tokio::test]
    async fn save_overwrites_previous_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let name = TaskName::new("job").unwrap();

        store.save(&name, &json!({"data": 1})).await.unwrap();
        assert_eq!(store.load(&name).await.unwrap(), Some(json!({"data": 1})));

        store.save(&name, &json!({"data": 2})).await.unwrap();
        assert_eq!(store.load(&name).await.unwrap(), Some(json!({"data": 2})));
        assert_eq!(
            store
                .query_i64("SELECT count(*) FROM garbo_job_state")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_and_reset_states_load_as_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        let name = TaskName::new("never-saved").unwrap();
        assert_eq!(store.load(&name).await.unwrap(), None);

        store.save(&name, &json!([1, 2])).await.unwrap();
        store.reset(&name).await.unwrap();
        assert_eq!(store.load(&name).await.unwrap(), None);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Resume {
        last_spph_id: i64,
    }

    #[tokio::test]
    async fn typed_helpers_round_trip_through_json() {
        let store = SqliteStore::open_in_memory().unwrap();
        let name = TaskName::new("populate-cache").unwrap();

        save_job_state(&store, &name, &Resume { last_spph_id: 42 })
            .await
            .unwrap();
        let loaded: Option<Resume> = load_job_state(&store, &name).await.unwrap();
        assert_eq!(loaded, Some(Resume { last_spph_id: 42 }));
    }
}
