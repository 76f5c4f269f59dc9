use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::attribution::{AttributionError, RecalculationOrchestrator, RefreshReport};
use crate::models::LinkEventAssociation;

pub struct AppState {
    pub orchestrator: RecalculationOrchestrator,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(context: &str, e: AttributionError) -> ApiError {
    let status = match e {
        AttributionError::Validation { .. } => StatusCode::BAD_REQUEST,
        AttributionError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => {
            tracing::error!("{}: {}", context, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: format!("{}: {}", context, e),
        }),
    )
}

/// List a link's associations with their windows and cached metrics
pub async fn list_associations(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
) -> Result<Json<Vec<LinkEventAssociation>>, ApiError> {
    state
        .orchestrator
        .list_associations(&link_id)
        .await
        .map(Json)
        .map_err(|e| error_response("Failed to list associations", e))
}

/// Link an event to a shortlink
pub async fn create_association(
    State(state): State<Arc<AppState>>,
    Path((link_id, event_id)): Path<(String, String)>,
) -> Result<Json<LinkEventAssociation>, ApiError> {
    state
        .orchestrator
        .create_association(&link_id, &event_id)
        .await
        .map(Json)
        .map_err(|e| error_response("Failed to create association", e))
}

/// Unlink an event from a shortlink
pub async fn remove_association(
    State(state): State<Arc<AppState>>,
    Path((link_id, event_id)): Path<(String, String)>,
) -> Result<Json<Vec<LinkEventAssociation>>, ApiError> {
    state
        .orchestrator
        .remove_association(&link_id, &event_id)
        .await
        .map(Json)
        .map_err(|e| error_response("Failed to remove association", e))
}

pub async fn recompute_link(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
) -> Result<Json<Vec<LinkEventAssociation>>, ApiError> {
    state
        .orchestrator
        .recompute_link(&link_id)
        .await
        .map(Json)
        .map_err(|e| error_response("Failed to recompute link", e))
}

pub async fn refresh_link_metrics(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    state
        .orchestrator
        .refresh_link_metrics(&link_id)
        .await
        .map(|count| Json(CountResponse { count }))
        .map_err(|e| error_response("Failed to refresh link metrics", e))
}

/// Called after an event is rescheduled
pub async fn recompute_for_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    state
        .orchestrator
        .recompute_for_event(&event_id)
        .await
        .map(|count| Json(CountResponse { count }))
        .map_err(|e| error_response("Failed to recompute event links", e))
}

/// Called after an event is deleted from the event store
pub async fn handle_event_deleted(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    state
        .orchestrator
        .handle_event_deleted(&event_id)
        .await
        .map(|count| Json(CountResponse { count }))
        .map_err(|e| error_response("Failed to handle event deletion", e))
}

pub async fn refresh_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshReport>, ApiError> {
    state
        .orchestrator
        .refresh_metrics_after(None, None)
        .await
        .map(Json)
        .map_err(|e| error_response("Failed to refresh metrics", e))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
