pub mod middleware;
pub mod v2;

use std::sync::Arc;

use axum::Router;

use crate::api::middleware::check_access;
use crate::utils::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .nest("/v2/", v2::create_v2_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            check_access,
        ))
        .with_state(state)
}
