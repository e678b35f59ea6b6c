//! JobStateStore port - small persisted state per task.
//!
//! Tasks that may not finish their backlog in one run keep a resume point
//! here (e.g. the last processed key) as an opaque JSON value.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskName;
use crate::error::GarboError;

#[async_trait]
pub trait JobStateStore: Send + Sync {
    async fn load(&self, name: &TaskName) -> Result<Option<serde_json::Value>, GarboError>;

    /// Update the stored value, inserting it if there is none yet.
    async fn save(&self, name: &TaskName, value: &serde_json::Value) -> Result<(), GarboError>;

    async fn reset(&self, name: &TaskName) -> Result<(), GarboError>;
}

/// Load and decode the state of `name`.
pub async fn load_job_state<T: DeserializeOwned>(
    store: &dyn JobStateStore,
    name: &TaskName,
) -> Result<Option<T>, GarboError> {
    match store.load(name).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and store the state of `name`.
pub async fn save_job_state<T: Serialize + Sync>(
    store: &dyn JobStateStore,
    name: &TaskName,
    state: &T,
) -> Result<(), GarboError> {
    let value = serde_json::to_value(state)?;
    store.save(name, &value).await
}
