//! Store reader seam: the two primitives every read path is built from.

use std::{collections::HashSet, future::Future, num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{KeyPrefix, Record};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store backend error: {message}")]
    Backend { message: String },
    #[error("store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("value under `{key}` is not valid UTF-8 text: {message}")]
    Decode { key: String, message: String },
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

/// One batch of a cursor-based key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Cursor for the next batch; `None` once the listing is complete.
    pub next: Option<u64>,
}

impl KeyPage {
    /// Final batch of a listing.
    pub fn last(keys: Vec<String>) -> Self {
        Self { keys, next: None }
    }
}

/// Remote key/value source. Implementations are fallible and may be slow.
#[async_trait]
pub trait StoreReader: Send + Sync {
    /// One batch of the keys starting with `prefix`. Listing starts at cursor `0` and
    /// follows [`KeyPage::next`] until it is `None`. A key may appear in more than one batch.
    async fn scan_keys(&self, prefix: &str, cursor: u64) -> Result<KeyPage, StoreError>;

    /// Raw value under `key`; `None` when the key does not exist.
    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Shared handle around a [`StoreReader`] that bounds every backend round trip with a timeout.
///
/// A round trip that exceeds the deadline resolves to [`StoreError::Timeout`], so a stalled
/// backend cannot wedge a refresh loop or a request. A listing made of many batches may take
/// longer than the timeout in total.
#[derive(Clone)]
pub struct StoreHandle {
    reader: Arc<dyn StoreReader>,
    timeout: Duration,
    concurrency: NonZeroUsize,
}

impl StoreHandle {
    pub fn new(reader: Arc<dyn StoreReader>, timeout: Duration, concurrency: NonZeroUsize) -> Self {
        Self {
            reader,
            timeout,
            concurrency,
        }
    }

    /// Maximum number of value fetches a single read path keeps in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency.get()
    }

    /// Every full key that starts with `prefix`, in backend order and without duplicates.
    pub async fn list_keys(&self, prefix: &KeyPrefix) -> Result<Vec<String>, StoreError> {
        let mut cursor = 0;
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        loop {
            let page = self
                .bounded("scan_keys", self.reader.scan_keys(prefix.as_str(), cursor))
                .await?;

            for key in page.keys {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }

            match page.next {
                Some(next) => cursor = next,
                None => return Ok(keys),
            }
        }
    }

    /// Fetch and decode the record stored under `key`.
    pub async fn fetch(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let raw = self.bounded("get_value", self.reader.get_value(key)).await?;

        let Some(bytes) = raw else {
            return Ok(None);
        };

        let body = String::from_utf8(bytes).map_err(|err| StoreError::Decode {
            key: key.to_string(),
            message: err.to_string(),
        })?;

        Ok(Some(Record::new(key, body)))
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout {
                operation,
                after: self.timeout,
            }))
    }
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use tokio::time::sleep;

    use super::*;

    struct StalledStore;

    #[async_trait]
    impl StoreReader for StalledStore {
        async fn scan_keys(&self, _prefix: &str, _cursor: u64) -> Result<KeyPage, StoreError> {
            pending().await
        }

        async fn get_value(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            pending().await
        }
    }

    struct BinaryStore;

    #[async_trait]
    impl StoreReader for BinaryStore {
        async fn scan_keys(&self, _prefix: &str, _cursor: u64) -> Result<KeyPage, StoreError> {
            Ok(KeyPage::last(vec!["bin.1".to_string()]))
        }

        async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            match key {
                "bin.1" => Ok(Some(vec![0xff, 0xfe])),
                _ => Ok(None),
            }
        }
    }

    /// Lists in three batches of 30 ms each; the middle batch repeats a key.
    struct PagedStore;

    #[async_trait]
    impl StoreReader for PagedStore {
        async fn scan_keys(&self, _prefix: &str, cursor: u64) -> Result<KeyPage, StoreError> {
            sleep(Duration::from_millis(30)).await;
            let page = match cursor {
                0 => KeyPage {
                    keys: vec!["cars.3".to_string(), "cars.1".to_string()],
                    next: Some(17),
                },
                17 => KeyPage {
                    keys: vec!["cars.1".to_string()],
                    next: Some(42),
                },
                _ => KeyPage::last(vec!["cars.2".to_string()]),
            };
            Ok(page)
        }

        async fn get_value(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }
    }

    fn handle(reader: Arc<dyn StoreReader>) -> StoreHandle {
        StoreHandle::new(reader, Duration::from_millis(50), NonZeroUsize::MIN)
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_list_resolves_to_timeout() {
        let store = handle(Arc::new(StalledStore));
        let err = store
            .list_keys(&KeyPrefix::new("cars."))
            .await
            .expect_err("stalled store must time out");
        assert!(matches!(
            err,
            StoreError::Timeout {
                operation: "scan_keys",
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_bounds_each_batch_not_the_whole_listing() {
        let store = handle(Arc::new(PagedStore));
        let started = tokio::time::Instant::now();

        let keys = store
            .list_keys(&KeyPrefix::new("cars."))
            .await
            .expect("every batch finishes within the timeout");

        assert!(started.elapsed() >= Duration::from_millis(90));
        assert_eq!(keys, ["cars.3", "cars.1", "cars.2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_get_resolves_to_timeout() {
        let store = handle(Arc::new(StalledStore));
        let err = store.fetch("cars.1").await.expect_err("must time out");
        assert!(matches!(
            err,
            StoreError::Timeout {
                operation: "get_value",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn non_utf8_value_is_a_decode_error() {
        let store = handle(Arc::new(BinaryStore));
        let err = store.fetch("bin.1").await.expect_err("binary value");
        assert!(matches!(err, StoreError::Decode { ref key, .. } if key == "bin.1"));
        assert!(store.fetch("bin.2").await.expect("absent key").is_none());
    }
}
