use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use kvgate::{
    application::{
        collections::{Collection, CollectionRegistry},
        store::{KeyPage, StoreError, StoreHandle, StoreReader},
    },
    cache::RefreshPolicy,
    domain::KeyPrefix,
    infra::{
        http::{REQUEST_ID_HEADER, build_router},
        memory::MemoryStore,
    },
};
use tokio::time::sleep;
use tower::ServiceExt;

const INTERVAL: Duration = Duration::from_millis(100);
const TOYOTA: &str = r#"{"ID":"1","Model":"Toyota","Year":2022}"#;

struct DownStore;

#[async_trait]
impl StoreReader for DownStore {
    async fn scan_keys(&self, _prefix: &str, _cursor: u64) -> Result<KeyPage, StoreError> {
        Err(StoreError::backend("connection refused"))
    }

    async fn get_value(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::backend("connection refused"))
    }
}

fn handle(reader: Arc<dyn StoreReader>) -> StoreHandle {
    StoreHandle::new(
        reader,
        Duration::from_secs(1),
        NonZeroUsize::new(4).expect("non-zero"),
    )
}

fn app(store: Arc<MemoryStore>) -> (Router, CollectionRegistry) {
    let registry = CollectionRegistry::new([
        Collection::cached(
            "/cars",
            KeyPrefix::new("cars."),
            handle(store.clone()),
            RefreshPolicy::new(INTERVAL, INTERVAL * 2),
        ),
        Collection::direct("/people", KeyPrefix::new("people."), handle(store)),
    ]);
    (build_router(&registry), registry)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    let body = String::from_utf8(bytes.to_vec()).expect("utf-8 body");
    (status, content_type, body)
}

#[tokio::test(start_paused = true)]
async fn cached_collection_serves_after_first_refresh() {
    let store = Arc::new(MemoryStore::new());
    store.put("cars.1", TOYOTA);
    let (router, registry) = app(store);

    let (status, content_type, body) = get(&router, "/cars").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, "[]");
    assert_eq!(get(&router, "/cars/1").await.0, StatusCode::NOT_FOUND);

    sleep(INTERVAL + Duration::from_millis(10)).await;

    assert_eq!(get(&router, "/cars").await.2, format!("[{TOYOTA}]"));
    assert_eq!(get(&router, "/cars?Model=Toyota").await.2, format!("[{TOYOTA}]"));
    assert_eq!(get(&router, "/cars?Model=Honda").await.2, "[]");

    let (status, content_type, body) = get(&router, "/cars/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, TOYOTA);

    registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn deleted_record_disappears_after_next_refresh() {
    let store = Arc::new(MemoryStore::new());
    store.put("cars.1", TOYOTA);
    let (router, registry) = app(store.clone());
    sleep(INTERVAL + Duration::from_millis(10)).await;
    assert_eq!(get(&router, "/cars/1").await.0, StatusCode::OK);

    store.remove("cars.1");
    assert_eq!(get(&router, "/cars/1").await.0, StatusCode::OK);

    sleep(INTERVAL).await;
    let (status, _, body) = get(&router, "/cars/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
    assert_eq!(get(&router, "/cars").await.2, "[]");

    registry.shutdown();
}

#[tokio::test]
async fn direct_collection_reflects_store_immediately() {
    let store = Arc::new(MemoryStore::new());
    let (router, _registry) = app(store.clone());
    assert_eq!(get(&router, "/people").await.2, "[]");

    let ada = r#"{"Name": "Ada",  "Born": 1815}"#;
    store.put("people.ada", ada);
    assert_eq!(get(&router, "/people").await.2, format!("[{ada}]"));
    assert_eq!(get(&router, "/people/ada").await.2, ada);

    store.remove("people.ada");
    assert_eq!(get(&router, "/people/ada").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn query_parameters_filter_lists() {
    let store = Arc::new(MemoryStore::new());
    store.put(
        "people.1",
        r#"{"Name":"Ada","Active":true,"Address":{"City":"London"}}"#,
    );
    store.put(
        "people.2",
        r#"{"Name":"Grace","Active":true,"Address":{"City":"New York"}}"#,
    );
    store.put(
        "people.3",
        r#"{"Name":"Alan","Active":false,"Address":{"City":"London"}}"#,
    );
    store.put("people.4", "not json");
    let (router, _registry) = app(store);

    let names = |body: String| -> Vec<String> {
        let values: Vec<serde_json::Value> = serde_json::from_str(&body).expect("json array");
        values
            .into_iter()
            .map(|value| value["Name"].as_str().unwrap_or_default().to_string())
            .collect()
    };

    let (_, _, body) = get(&router, "/people?Address.City=London").await;
    assert_eq!(names(body), ["Ada", "Alan"]);

    let (_, _, body) = get(&router, "/people?Address.City=London&Active=true").await;
    assert_eq!(names(body), ["Ada"]);

    let (_, _, body) = get(&router, "/people?Name=Ada&Name=Grace").await;
    assert_eq!(names(body), ["Ada", "Grace"]);

    let (_, _, body) = get(&router, "/people?Address.City=New%20York").await;
    assert_eq!(names(body), ["Grace"]);

    let (_, _, body) = get(&router, "/people?Address.Zip=1").await;
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn unfiltered_list_keeps_malformed_records() {
    let store = Arc::new(MemoryStore::new());
    store.put("people.1", "not json");
    let (router, _registry) = app(store);

    assert_eq!(get(&router, "/people").await.2, "[not json]");
}

#[tokio::test]
async fn store_failure_maps_to_service_unavailable() {
    let registry = CollectionRegistry::new([Collection::direct(
        "/cars",
        KeyPrefix::new("cars."),
        handle(Arc::new(DownStore)),
    )]);
    let router = build_router(&registry);

    let (status, _, body) = get(&router, "/cars").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "Store unavailable");
    assert_eq!(
        get(&router, "/cars/1").await.0,
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn health_and_request_id() {
    let registry = CollectionRegistry::default();
    let router = build_router(&registry);

    let request = Request::builder()
        .uri("/_health")
        .body(Body::empty())
        .expect("request should build");
    let response = router.oneshot(request).await.expect("router should respond");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .expect("request id header");
    assert_eq!(request_id.len(), 36);
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let store = Arc::new(MemoryStore::new());
    let (router, _registry) = app(store);
    assert_eq!(get(&router, "/trucks").await.0, StatusCode::NOT_FOUND);
    assert_eq!(get(&router, "/people/1/extra").await.0, StatusCode::NOT_FOUND);
}
