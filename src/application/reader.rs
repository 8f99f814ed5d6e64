//! Read paths that turn a key prefix into records.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use thiserror::Error;
use tracing::debug;

use crate::domain::{KeyPrefix, Record};

use super::store::{StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no collection is configured for key prefix `{prefix}`")]
    UnknownCollection { prefix: String },
}

/// Source of records for one collection.
#[async_trait]
pub trait CollectionReader: Send + Sync {
    /// Record stored under `prefix + id`; `None` is a normal "not found" outcome.
    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, ReadError>;

    /// Every record under the prefix, in unspecified order.
    async fn get_all(&self) -> Result<Vec<Record>, ReadError>;
}

/// Pass-through reader that hits the store on every call.
pub struct DirectReader {
    prefix: KeyPrefix,
    store: StoreHandle,
}

impl DirectReader {
    pub fn new(prefix: KeyPrefix, store: StoreHandle) -> Self {
        Self { prefix, store }
    }
}

#[async_trait]
impl CollectionReader for DirectReader {
    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, ReadError> {
        let key = self.prefix.key_for(id);
        Ok(self.store.fetch(&key).await?)
    }

    async fn get_all(&self) -> Result<Vec<Record>, ReadError> {
        let keys = self.store.list_keys(&self.prefix).await?;
        let store = &self.store;

        let fetched: Vec<Option<Record>> = stream::iter(keys)
            .map(|key| async move { store.fetch(&key).await })
            .buffered(store.concurrency())
            .try_collect()
            .await?;

        let listed = fetched.len();
        let records: Vec<Record> = fetched.into_iter().flatten().collect();
        if records.len() != listed {
            debug!(
                target = "kvgate::read",
                prefix = %self.prefix,
                vanished = listed - records.len(),
                "keys disappeared between listing and fetching"
            );
        }

        Ok(records)
    }
}
