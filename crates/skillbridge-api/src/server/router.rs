//! Application router configuration.

use axum::{
    Router,
    routing::{get, post},
};

use super::types::{MAX_REQUEST_BODY_SIZE, ServerState};

/// Create the application router with a specific state.
pub fn create_router(state: ServerState) -> Router {
    use crate::handlers::{basic, invoke, operations};

    Router::new()
        .route("/health", get(basic::health_handler))
        .route("/invoke/*skill_path", post(invoke::invoke_handler))
        .route(
            "/operations/:asset_id/:skill_name",
            post(operations::operation_handler),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_REQUEST_BODY_SIZE,
        ))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
