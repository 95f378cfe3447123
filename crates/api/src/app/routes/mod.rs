use axum::{Router, routing::post};

pub mod bikes;
pub mod processors;
pub mod system;

/// Router for the control and query surfaces.
pub fn router() -> Router {
    Router::new()
        .route("/events", post(system::append_event))
        .nest("/eventprocessors", processors::router())
        .nest("/bikes", bikes::router())
}
