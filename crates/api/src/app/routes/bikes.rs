//! Bike status queries and their live subscriptions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use pedalstream_rental::CountOfBikesByTypeQuery;

use crate::app::{errors, services::{self, AppServices}};

pub fn router() -> Router {
    Router::new()
        .route("/", get(find_all))
        .route("/updates", get(find_all_updates))
        .route("/available/:bike_type", get(find_available))
        .route("/count/:bike_type", get(count_by_type))
        .route("/:bike_id", get(find_one))
        .route("/:bike_id/updates", get(find_one_updates))
}

/// GET /bikes
pub async fn find_all(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.bike_status.find_all() {
        Ok(bikes) => Json(bikes).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

/// GET /bikes/available/:bike_type
pub async fn find_available(
    Extension(services): Extension<Arc<AppServices>>,
    Path(bike_type): Path<String>,
) -> axum::response::Response {
    match services.bike_status.find_available(&bike_type) {
        Ok(bikes) => Json(bikes).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

/// GET /bikes/count/:bike_type
pub async fn count_by_type(
    Extension(services): Extension<Arc<AppServices>>,
    Path(query): Path<CountOfBikesByTypeQuery>,
) -> axum::response::Response {
    match services.bike_status.count_by_type(&query.bike_type) {
        Ok(count) => Json(json!({ "bike_type": query.bike_type, "count": count })).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

/// GET /bikes/:bike_id
pub async fn find_one(
    Extension(services): Extension<Arc<AppServices>>,
    Path(bike_id): Path<String>,
) -> axum::response::Response {
    match services.bike_status.find_one(&bike_id) {
        Ok(Some(bike)) => Json(bike).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("bike '{bike_id}' not found")),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

/// GET /bikes/updates (SSE)
///
/// Subscribes before reading the initial result so no update falls in between.
pub async fn find_all_updates(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let subscription = services.bike_status.subscribe_all();
    match services.bike_status.find_all() {
        Ok(bikes) => services::query_sse_stream(bikes, subscription).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}

/// GET /bikes/:bike_id/updates (SSE)
pub async fn find_one_updates(
    Extension(services): Extension<Arc<AppServices>>,
    Path(bike_id): Path<String>,
) -> axum::response::Response {
    let subscription = services.bike_status.subscribe_one(&bike_id);
    match services.bike_status.find_one(&bike_id) {
        Ok(bike) => services::query_sse_stream(bike, subscription).into_response(),
        Err(e) => errors::read_model_error_to_response(e),
    }
}
