//! Router setup and shared handler state

use super::handlers;
use crate::accuracy::AccuracyTracker;
use crate::events::EventBus;
use crate::history::SessionHistory;
use crate::licensing::LicenseStore;
use crate::supervisor::Supervisor;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Context handed to every handler
///
/// Clone is cheap; everything inside is an Arc or a channel handle.
#[derive(Clone)]
pub struct AppContext {
    pub licenses: Arc<LicenseStore>,
    pub supervisor: Arc<Supervisor>,
    pub accuracy: Arc<AccuracyTracker>,
    pub history: Arc<SessionHistory>,
    pub bus: EventBus,
}

/// Create the API router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health check lives outside the versioned prefix
        .route("/health", get(handlers::health))
        // API v1 routes
        .nest(
            "/api/v1",
            Router::new()
                // License administration
                .route("/licenses", post(handlers::create_license))
                .route("/licenses", get(handlers::list_licenses))
                .route("/licenses/purge", post(handlers::purge_licenses))
                .route("/licenses/:id/redeem", post(handlers::redeem_license))
                .route("/licenses/:id/revoke", post(handlers::revoke_license))
                .route("/licenses/:id", delete(handlers::delete_license))
                // Task control
                .route("/tasks/start", post(handlers::start_task))
                .route("/tasks/stop", post(handlers::stop_task))
                .route("/tasks", get(handlers::list_tasks))
                // Observability
                .route("/accuracy", get(handlers::get_accuracy))
                .route("/pattern", get(handlers::get_pattern))
                // SSE events
                .route("/events", get(super::sse::event_stream)),
        )
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local admin tooling
        .layer(CorsLayer::permissive())
}
