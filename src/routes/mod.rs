mod common;
mod entity;

pub use common::common_routes_with_ready;
pub use entity::{entity_routes, MAX_BODY_BYTES};

use crate::state::AppState;
use axum::Router;

/// Operational routes merged with the entity routes.
pub fn app(state: AppState) -> Router {
    common_routes_with_ready(state.clone()).merge(entity_routes(state))
}
