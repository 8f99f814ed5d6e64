//! Background-refreshed read cache for one key prefix.

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Instant as WallInstant,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use metrics::{counter, gauge, histogram};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    application::{
        reader::{CollectionReader, ReadError},
        store::{StoreError, StoreHandle},
    },
    domain::{KeyPrefix, Record},
};

use super::{config::RefreshPolicy, lock, snapshot::Snapshot};

const METRIC_REFRESH_TOTAL: &str = "kvgate_cache_refresh_total";
const METRIC_FETCH_FAILURES: &str = "kvgate_cache_fetch_failures_total";
const METRIC_REFRESH_MS: &str = "kvgate_cache_refresh_ms";
const METRIC_SNAPSHOT_ENTRIES: &str = "kvgate_cache_snapshot_entries";

/// Slot holding the current snapshot. Readers clone the `Arc` and never block the writer
/// for longer than a pointer swap.
#[derive(Debug)]
struct SnapshotSlot {
    prefix: KeyPrefix,
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotSlot {
    fn new(prefix: KeyPrefix) -> Self {
        Self {
            prefix,
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    fn load(&self) -> Arc<Snapshot> {
        lock::read(&self.current, &self.prefix, "snapshot_load").clone()
    }

    fn store(&self, snapshot: Snapshot) {
        *lock::write(&self.current, &self.prefix, "snapshot_store") = Arc::new(snapshot);
    }
}

/// Outcome of one successful refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub cycle: u64,
    pub listed: usize,
    pub installed: usize,
    pub failed: usize,
    pub vanished: usize,
}

/// Read cache that serves a prefix from an in-memory snapshot rebuilt on a fixed interval.
///
/// Reads never touch the store. Until the first refresh completes the cache is cold and
/// every read answers empty or not found. A failed key listing keeps the previous snapshot;
/// a key that fails to fetch is left out of the next snapshot only.
pub struct RefreshingCache {
    prefix: KeyPrefix,
    slot: Arc<SnapshotSlot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshingCache {
    /// Start the refresh loop on the current Tokio runtime.
    pub fn spawn(prefix: KeyPrefix, store: StoreHandle, policy: RefreshPolicy) -> Self {
        let slot = Arc::new(SnapshotSlot::new(prefix.clone()));
        let refresher = Refresher {
            prefix: prefix.clone(),
            store,
            policy,
            slot: slot.clone(),
        };
        let task = tokio::spawn(refresher.run());

        Self {
            prefix,
            slot,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    /// The snapshot installed by the most recent successful refresh.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.slot.load()
    }

    pub fn lookup(&self, id: &str) -> Option<Record> {
        let key = self.prefix.key_for(id);
        self.snapshot().get(&key, Instant::now()).cloned()
    }

    pub fn records(&self) -> Vec<Record> {
        self.snapshot().records(Instant::now())
    }

    pub fn is_running(&self) -> bool {
        lock::lock(&self.task, &self.prefix, "task_state")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the refresh loop. The last snapshot stays readable until its entries expire.
    pub fn shutdown(&self) {
        if let Some(task) = lock::lock(&self.task, &self.prefix, "task_shutdown").take() {
            task.abort();
            debug!(
                target = "kvgate::cache",
                prefix = %self.prefix,
                "refresh loop stopped"
            );
        }
    }
}

impl Drop for RefreshingCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl CollectionReader for RefreshingCache {
    async fn get_by_id(&self, id: &str) -> Result<Option<Record>, ReadError> {
        Ok(self.lookup(id))
    }

    async fn get_all(&self) -> Result<Vec<Record>, ReadError> {
        Ok(self.records())
    }
}

/// Sole writer of a cache's snapshot slot.
struct Refresher {
    prefix: KeyPrefix,
    store: StoreHandle,
    policy: RefreshPolicy,
    slot: Arc<SnapshotSlot>,
}

impl Refresher {
    async fn run(self) {
        let mut ticker = interval(self.policy.refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first refresh runs one interval in.
        ticker.tick().await;

        let mut cycle: u64 = 0;
        let mut warm = false;
        loop {
            ticker.tick().await;
            cycle += 1;
            if let Ok(report) = self.refresh(cycle).await
                && !warm
            {
                warm = true;
                info!(
                    target = "kvgate::cache",
                    prefix = %self.prefix,
                    cycle,
                    entries = report.installed,
                    "cache warmed"
                );
            }
        }
    }

    #[instrument(skip(self), fields(prefix = %self.prefix))]
    async fn refresh(&self, cycle: u64) -> Result<RefreshReport, StoreError> {
        let started = WallInstant::now();
        let prefix_label = self.prefix.to_string();

        let keys = match self.store.list_keys(&self.prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(
                    target = "kvgate::cache",
                    prefix = %self.prefix,
                    cycle,
                    error = %err,
                    "key listing failed; keeping previous snapshot"
                );
                counter!(METRIC_REFRESH_TOTAL, "prefix" => prefix_label, "outcome" => "failed")
                    .increment(1);
                return Err(err);
            }
        };

        let listed = keys.len();
        let store = &self.store;
        let fetched: Vec<(String, Result<Option<Record>, StoreError>)> = stream::iter(keys)
            .map(|key| async move {
                let result = store.fetch(&key).await;
                (key, result)
            })
            .buffer_unordered(store.concurrency())
            .collect()
            .await;

        let mut records = Vec::with_capacity(listed);
        let mut failed = 0;
        let mut vanished = 0;
        for (key, result) in fetched {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => vanished += 1,
                Err(err) => {
                    failed += 1;
                    warn!(
                        target = "kvgate::cache",
                        prefix = %self.prefix,
                        key = %key,
                        cycle,
                        error = %err,
                        "skipping key for this refresh"
                    );
                }
            }
        }

        let snapshot = Snapshot::build(cycle, records, self.policy.entry_ttl(), Instant::now());
        let installed = snapshot.len();
        self.slot.store(snapshot);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let outcome = if failed == 0 { "ok" } else { "partial" };
        counter!(METRIC_REFRESH_TOTAL, "prefix" => prefix_label.clone(), "outcome" => outcome)
            .increment(1);
        if failed > 0 {
            counter!(METRIC_FETCH_FAILURES, "prefix" => prefix_label.clone())
                .increment(failed as u64);
        }
        histogram!(METRIC_REFRESH_MS, "prefix" => prefix_label.clone()).record(elapsed_ms);
        gauge!(METRIC_SNAPSHOT_ENTRIES, "prefix" => prefix_label).set(installed as f64);

        debug!(
            target = "kvgate::cache",
            prefix = %self.prefix,
            cycle,
            listed,
            installed,
            failed,
            vanished,
            elapsed_ms,
            "snapshot installed"
        );

        Ok(RefreshReport {
            cycle,
            listed,
            installed,
            failed,
            vanished,
        })
    }
}
