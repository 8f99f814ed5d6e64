//! Immutable point-in-time copy of a prefix's keyspace.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::domain::Record;

#[derive(Debug, Clone)]
struct Entry {
    record: Record,
    expires_at: Instant,
}

/// Records captured by one refresh cycle, keyed by full store key.
///
/// A snapshot is never mutated after construction. Expired entries stay in memory
/// until the snapshot is replaced but are invisible to every read.
#[derive(Debug, Default)]
pub struct Snapshot {
    cycle: u64,
    entries: BTreeMap<Arc<str>, Entry>,
}

impl Snapshot {
    /// The cold snapshot served before the first successful refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn build(cycle: u64, records: Vec<Record>, ttl: Duration, inserted_at: Instant) -> Self {
        let entries = records
            .into_iter()
            .map(|record| {
                let key: Arc<str> = Arc::from(record.key());
                let entry = Entry {
                    record,
                    expires_at: inserted_at + ttl,
                };
                (key, entry)
            })
            .collect();
        Self { cycle, entries }
    }

    /// Refresh cycle that produced this snapshot; `0` for the cold snapshot.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_cold(&self) -> bool {
        self.cycle == 0
    }

    /// Entries held, including expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<&Record> {
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| &entry.record)
    }

    /// Live records in key order.
    pub fn records(&self, now: Instant) -> Vec<Record> {
        self.entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.record.clone())
            .collect()
    }
}
