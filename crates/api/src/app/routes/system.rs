use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use pedalstream_rental::RentalEvent;

use crate::app::{errors, services::AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /events
///
/// Append a rental event to the log; processors pick it up asynchronously.
pub async fn append_event(
    Extension(services): Extension<Arc<AppServices>>,
    Json(event): Json<RentalEvent>,
) -> axum::response::Response {
    if let Err(e) = event.validate() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string());
    }
    match services.append_event(&event) {
        Ok(stored) => (
            StatusCode::CREATED,
            Json(json!({
                "event_id": stored.event_id.to_string(),
                "global_position": stored.global_position,
                "event_type": stored.event_type,
                "bike_id": stored.aggregate_id,
            })),
        )
            .into_response(),
        Err(e) => errors::event_log_error_to_response(e),
    }
}
