pub mod common;
pub mod entity;

pub use common::common_routes;
pub use entity::entity_routes;

use crate::state::AppState;
use axum::Router;

/// Common routes plus every entity set, ready to serve.
pub fn app(state: AppState, json_body_limit: usize) -> Router {
    Router::new()
        .merge(common_routes())
        .merge(entity_routes(state, json_body_limit))
}
