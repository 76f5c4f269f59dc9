use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::attribution::RecalculationOrchestrator;

use super::handlers::{
    create_association, handle_event_deleted, health_check, list_associations, recompute_for_event,
    recompute_link, refresh_link_metrics, refresh_metrics, remove_association, AppState,
};

pub fn create_api_router(orchestrator: RecalculationOrchestrator) -> Router {
    let state = Arc::new(AppState { orchestrator });

    let api_routes = Router::new()
        .route("/links/{link_id}/associations", get(list_associations))
        .route(
            "/links/{link_id}/events/{event_id}",
            post(create_association).delete(remove_association),
        )
        .route("/links/{link_id}/recompute", post(recompute_link))
        .route("/links/{link_id}/refresh", post(refresh_link_metrics))
        .route("/events/{event_id}/recompute", post(recompute_for_event))
        .route("/events/{event_id}", delete(handle_event_deleted))
        .route("/refresh", post(refresh_metrics))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
