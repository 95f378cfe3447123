//! Event processor control surface.
//!
//! Every operation may block on in-flight batches (bounded by the processor's
//! shutdown timeout), so handlers run them on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde_json::json;

use pedalstream_core::DeadLetterId;
use pedalstream_infra::processing::{EventProcessor, ProcessorError};

use crate::app::{errors, services::AppServices};

/// How long a released segment stays unclaimed by this node.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_processors))
        .route("/:name/splitsegment/:segment", put(split_segment))
        .route("/:name/mergesegment/:segment", put(merge_segment))
        .route("/:name/releasesegment/:segment", put(release_segment))
        .route("/:name/claimsegment/:segment", put(claim_segment))
        .route("/:name/shutdown", put(shutdown))
        .route("/:name/start", put(start))
        .route("/:name/initiatereplay", put(initiate_replay))
        .route("/:name/initiatereplay/:reset_to", put(initiate_replay_to))
        .route("/:name/deadletters", get(list_dead_letters))
        .route("/:name/deadletters/:id", delete(evict_dead_letter))
        .route("/:name/deadletters/:id/retry", post(retry_dead_letter))
        .route("/adminchannel/:name/split", put(admin_split))
        .route("/adminchannel/:name/merge", put(admin_merge))
        .route("/adminchannel/:name/pause", put(admin_pause))
        .route("/adminchannel/:name/start", put(admin_start))
}

/// Run a processor operation off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProcessorError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(errors::processor_error_to_response),
        Err(e) => Err(errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            format!("processor task failed: {e}"),
        )),
    }
}

fn processor(services: &AppServices, name: &str) -> Result<Arc<EventProcessor>, axum::response::Response> {
    services
        .processors
        .get(name)
        .cloned()
        .map_err(errors::processor_error_to_response)
}

/// Run a segment operation and report `{processor, segment, result}`.
async fn segment_operation<F>(
    services: Arc<AppServices>,
    name: String,
    segment: u32,
    op: F,
) -> axum::response::Response
where
    F: FnOnce(&EventProcessor, u32) -> Result<bool, ProcessorError> + Send + 'static,
{
    let handle = match processor(&services, &name) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match blocking(move || op(handle.as_ref(), segment)).await {
        Ok(result) => Json(json!({
            "processor": name,
            "segment": segment,
            "result": result,
        }))
        .into_response(),
        Err(resp) => resp,
    }
}

/// Run a processor-wide operation and report `{processor, result}`.
async fn processor_operation<F>(services: Arc<AppServices>, name: String, op: F) -> axum::response::Response
where
    F: FnOnce(&EventProcessor) -> Result<bool, ProcessorError> + Send + 'static,
{
    let handle = match processor(&services, &name) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match blocking(move || op(handle.as_ref())).await {
        Ok(result) => Json(json!({ "processor": name, "result": result })).into_response(),
        Err(resp) => resp,
    }
}

/// GET /eventprocessors
pub async fn list_processors(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let processors = services.processors.clone();
    match tokio::task::spawn_blocking(move || processors.list_status()).await {
        Ok(statuses) => Json(statuses).into_response(),
        Err(e) => errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()),
    }
}

/// PUT /eventprocessors/:name/splitsegment/:segment
///
/// `result: false` when this node does not hold the segment.
pub async fn split_segment(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, segment)): Path<(String, u32)>,
) -> axum::response::Response {
    segment_operation(services, name, segment, |p, s| p.split_segment(s)).await
}

/// PUT /eventprocessors/:name/mergesegment/:segment
pub async fn merge_segment(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, segment)): Path<(String, u32)>,
) -> axum::response::Response {
    segment_operation(services, name, segment, |p, s| p.merge_segment(s)).await
}

/// PUT /eventprocessors/:name/releasesegment/:segment
pub async fn release_segment(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, segment)): Path<(String, u32)>,
) -> axum::response::Response {
    segment_operation(services, name, segment, |p, s| p.release_segment(s, RELEASE_TIMEOUT)).await
}

/// PUT /eventprocessors/:name/claimsegment/:segment
pub async fn claim_segment(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, segment)): Path<(String, u32)>,
) -> axum::response::Response {
    segment_operation(services, name, segment, |p, s| p.claim_segment(s)).await
}

/// PUT /eventprocessors/:name/shutdown
pub async fn shutdown(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.shutdown().map(|()| true)).await
}

/// PUT /eventprocessors/:name/start
pub async fn start(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.start().map(|()| true)).await
}

/// PUT /eventprocessors/:name/initiatereplay
pub async fn initiate_replay(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    replay(services, name, None).await
}

/// PUT /eventprocessors/:name/initiatereplay/:reset_to
///
/// `reset_to` is an RFC 3339 timestamp or a log position.
pub async fn initiate_replay_to(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, reset_to)): Path<(String, String)>,
) -> axum::response::Response {
    replay(services, name, Some(reset_to)).await
}

async fn replay(services: Arc<AppServices>, name: String, reset_to: Option<String>) -> axum::response::Response {
    let controller = services.replay.clone();
    let processor_name = name.clone();
    match blocking(move || controller.initiate_replay(&processor_name, reset_to.as_deref())).await {
        Ok(target) => Json(json!({ "processor": name, "reset_to": target })).into_response(),
        Err(resp) => resp,
    }
}

/// GET /eventprocessors/:name/deadletters
pub async fn list_dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    let handle = match processor(&services, &name) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    match blocking(move || handle.dead_letters()).await {
        Ok(entries) => Json(entries).into_response(),
        Err(resp) => resp,
    }
}

/// POST /eventprocessors/:name/deadletters/:id/retry
pub async fn retry_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, id)): Path<(String, String)>,
) -> axum::response::Response {
    let id: DeadLetterId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };
    processor_operation(services, name, move |p| p.retry_dead_letter(id).map(|()| true)).await
}

/// DELETE /eventprocessors/:name/deadletters/:id
pub async fn evict_dead_letter(
    Extension(services): Extension<Arc<AppServices>>,
    Path((name, id)): Path<(String, String)>,
) -> axum::response::Response {
    let id: DeadLetterId = match id.parse() {
        Ok(id) => id,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match processor_operation(services, name, move |p| p.evict_dead_letter(id).map(|()| true)).await {
        resp if resp.status().is_success() => StatusCode::NO_CONTENT.into_response(),
        resp => resp,
    }
}

/// PUT /eventprocessors/adminchannel/:name/split
pub async fn admin_split(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.split_largest_segment()).await
}

/// PUT /eventprocessors/adminchannel/:name/merge
pub async fn admin_merge(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.merge_smallest_segment()).await
}

/// PUT /eventprocessors/adminchannel/:name/pause
pub async fn admin_pause(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.pause().map(|()| true)).await
}

/// PUT /eventprocessors/adminchannel/:name/start
pub async fn admin_start(
    Extension(services): Extension<Arc<AppServices>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    processor_operation(services, name, |p| p.resume().map(|()| true)).await
}
