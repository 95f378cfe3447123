use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use pedalstream_core::DomainError;
use pedalstream_infra::event_log::EventLogError;
use pedalstream_infra::processing::ProcessorError;
use pedalstream_infra::read_model::ReadModelError;

pub fn processor_error_to_response(err: ProcessorError) -> Response {
    let message = err.to_string();
    match err {
        ProcessorError::ClaimConflict { .. } => json_error(StatusCode::CONFLICT, "claim_conflict", message),
        ProcessorError::InvalidMerge { .. } => json_error(StatusCode::CONFLICT, "invalid_merge", message),
        ProcessorError::InvalidState { .. } => json_error(StatusCode::CONFLICT, "invalid_state", message),
        ProcessorError::ResetNotSupported(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "reset_not_supported", message)
        }
        ProcessorError::HandlerApply { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "handler_failed", message)
        }
        ProcessorError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        ProcessorError::UnknownProcessor(_) | ProcessorError::UnknownSegment { .. } => {
            json_error(StatusCode::NOT_FOUND, "not_found", message)
        }
        ProcessorError::DeadLetterNotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        ProcessorError::StorageUnavailable(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", message)
        }
        ProcessorError::Spawn(_) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "spawn_error", message),
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

pub fn read_model_error_to_response(err: ReadModelError) -> Response {
    json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", err.to_string())
}

pub fn event_log_error_to_response(err: EventLogError) -> Response {
    match err {
        EventLogError::InvalidAppend(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_event", msg),
        EventLogError::Unavailable(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", msg),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pedalstream_infra::processing::ProcessorState;

    #[test]
    fn processor_errors_map_to_documented_statuses() {
        let cases = [
            (
                ProcessorError::InvalidMerge {
                    processor: "p".to_string(),
                    segment: 0,
                    reason: "root segment".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                ProcessorError::InvalidState {
                    processor: "p".to_string(),
                    expected: ProcessorState::Paused,
                    actual: ProcessorState::Running,
                },
                StatusCode::CONFLICT,
            ),
            (
                ProcessorError::ResetNotSupported("p".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ProcessorError::UnknownProcessor("p".to_string()), StatusCode::NOT_FOUND),
            (
                ProcessorError::StorageUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(processor_error_to_response(err).status(), status);
        }
    }
}
