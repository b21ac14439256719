//! Route definitions.

use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Build the agent router.
///
/// Probes keep the default debug-level trace layer so they stay out of the
/// access log; every other route is traced at info.
pub fn create_router(state: AppState) -> Router {
    let probes = Router::new()
        .route("/healthz/live", get(handlers::live))
        .route("/healthz/ready", get(handlers::ready))
        .layer(TraceLayer::new_for_http());

    let api = Router::new()
        .route("/intents", post(handlers::submit_intent))
        .route("/plans", get(handlers::list_plans))
        .route("/plans/{id}", get(handlers::get_plan))
        .route("/plans/{id}/cancel", post(handlers::cancel_plan))
        .route("/actions", get(handlers::list_actions))
        .route("/webhooks/grafana", post(handlers::grafana_webhook))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    probes.merge(api).with_state(state)
}
