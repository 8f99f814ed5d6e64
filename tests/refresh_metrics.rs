use std::{collections::HashSet, num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use kvgate::{
    application::{
        query::apply_filters,
        store::{KeyPage, StoreError, StoreHandle, StoreReader},
    },
    cache::{RefreshPolicy, RefreshingCache},
    domain::{KeyPrefix, Record},
    infra::{memory::MemoryStore, telemetry},
};
use metrics_util::debugging::DebuggingRecorder;
use tokio::time::sleep;

/// Fails every fetch of `cars.broken`.
struct PartlyBroken(MemoryStore);

#[async_trait]
impl StoreReader for PartlyBroken {
    async fn scan_keys(&self, prefix: &str, cursor: u64) -> Result<KeyPage, StoreError> {
        self.0.scan_keys(prefix, cursor).await
    }

    async fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if key == "cars.broken" {
            return Err(StoreError::backend("checksum mismatch"));
        }
        self.0.get_value(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_and_filter_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let memory = MemoryStore::new();
    memory.put("cars.1", r#"{"Model":"Toyota"}"#);
    memory.put("cars.broken", r#"{"Model":"Honda"}"#);
    let store = StoreHandle::new(
        Arc::new(PartlyBroken(memory)),
        Duration::from_secs(1),
        NonZeroUsize::MIN,
    );

    let interval = Duration::from_millis(100);
    let cache = RefreshingCache::spawn(
        KeyPrefix::new("cars."),
        store,
        RefreshPolicy::new(interval, interval * 2),
    );
    sleep(interval + Duration::from_millis(10)).await;
    assert_eq!(cache.records().len(), 1);
    cache.shutdown();

    let filtered = apply_filters(
        [("Model", "Toyota")],
        vec![Record::new("cars.bad", "{oops")],
    );
    assert!(filtered.is_empty());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "kvgate_cache_refresh_total",
        "kvgate_cache_fetch_failures_total",
        "kvgate_cache_refresh_ms",
        "kvgate_cache_snapshot_entries",
        "kvgate_query_malformed_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
