use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use ark_batch::BatchCoordinator;

use crate::handler;

/// Build the axum router with all Ark endpoints.
pub fn build_router(coordinator: BatchCoordinator) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route(
            "/v1/batches",
            get(handler::list_batches).post(handler::create_batch),
        )
        .route("/v1/batches/:id", get(handler::batch_status))
        .route("/v1/batches/:id/start", post(handler::start_batch))
        .route("/v1/batches/:id/suspend", post(handler::suspend_batch))
        .route("/v1/batches/:id/resume", post(handler::resume_batch))
        .route("/v1/batches/:id/cancel", post(handler::cancel_batch))
        .route("/v1/storage", get(handler::storage_state))
        .route("/v1/sips/:sip/fixity", get(handler::sip_fixity))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}
