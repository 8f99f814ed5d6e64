//! Redis-backed [`StoreReader`].

use std::num::NonZeroUsize;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::application::store::{KeyPage, StoreError, StoreReader};

use super::error::InfraError;

/// Reader over a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    scan_count: NonZeroUsize,
}

impl RedisStore {
    pub async fn connect(url: &str, scan_count: NonZeroUsize) -> Result<Self, InfraError> {
        let client = redis::Client::open(url)
            .map_err(|err| InfraError::store(format!("invalid redis url: {err}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::store(format!("failed to connect to redis: {err}")))?;

        info!(target = "kvgate::store", "connected to redis");

        Ok(Self {
            connection,
            scan_count,
        })
    }
}

#[async_trait]
impl StoreReader for RedisStore {
    /// One `SCAN` round trip; Redis signals the end of the iteration with cursor `0`.
    async fn scan_keys(&self, prefix: &str, cursor: u64) -> Result<KeyPage, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut connection = self.connection.clone();
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(self.scan_count.get())
            .query_async(&mut connection)
            .await
            .map_err(StoreError::backend)?;

        Ok(KeyPage {
            keys,
            next: (next != 0).then_some(next),
        })
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(StoreError::backend)
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_prefix_is_unchanged() {
        assert_eq!(escape_glob("cached-cars."), "cached-cars.");
    }

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }
}
