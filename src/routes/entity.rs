//! Entity routes. Path segments are matched generically; handlers resolve the entity set by name.
//! JSON bodies are capped at `json_body_limit`; the upload route streams and has no cap.

use crate::handlers::entity::{
    create, invoke_property_action, list_or_read, read_property, read_property_action, remove, update,
    write_property,
};
use crate::state::AppState;
use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Request span per call, response logged with latency.
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

pub fn entity_routes(state: AppState, json_body_limit: usize) -> Router {
    Router::new()
        .route(
            "/:segment",
            get(list_or_read)
                .post(create)
                .put(update)
                .delete(remove)
                .layer(RequestBodyLimitLayer::new(json_body_limit)),
        )
        .route("/:segment/:property", get(read_property).put(write_property))
        .route(
            "/:segment/:property/:action",
            get(read_property_action)
                .post(invoke_property_action)
                .layer(DefaultBodyLimit::disable()),
        )
        .layer(trace_layer())
        .with_state(state)
}
