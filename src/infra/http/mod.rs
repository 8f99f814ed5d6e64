//! HTTP surface: one list route and one item route per configured collection.

mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;

use crate::{
    application::{
        collections::{Collection, CollectionRegistry},
        error::HttpError,
        query::QueryFilter,
    },
    domain::join_json_array,
};

pub use middleware::{REQUEST_ID_HEADER, RequestContext};

pub const HEALTH_PATH: &str = "/_health";

/// Router serving every collection in `registry` plus the health endpoint.
pub fn build_router(registry: &CollectionRegistry) -> Router {
    let mut router = Router::new().route(HEALTH_PATH, get(health));

    for collection in registry.iter() {
        let item_path = format!("{}/{{id}}", collection.uri());
        let routes = Router::new()
            .route(collection.uri(), get(list_records))
            .route(&item_path, get(get_record))
            .with_state(collection.clone());
        router = router.merge(routes);
    }

    router
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
}

async fn list_records(
    State(collection): State<Arc<Collection>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HttpError> {
    let filter: QueryFilter = params.into_iter().collect();
    let records = collection.list(&filter).await?;
    Ok(json_response(Bytes::from(join_json_array(&records))))
}

async fn get_record(
    State(collection): State<Arc<Collection>>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    match collection.get(&id).await? {
        Some(record) => Ok(json_response(Bytes::copy_from_slice(
            record.body().as_bytes(),
        ))),
        None => Err(HttpError::not_found(
            "infra::http::get_record",
            format!("no record under `{}`", collection.prefix().key_for(&id)),
        )),
    }
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn json_response(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
