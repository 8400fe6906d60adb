use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use super::{AssignmentResponse, ListResponse};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_assignments))
        .route("/{assignment_id}", get(get_assignment))
}

/// GET /v1/assignments
async fn list_assignments(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let assignments = state
        .engine()
        .list_assignments()
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(ListResponse::<AssignmentResponse>::collect_from(assignments)))
}

/// GET /v1/assignments/{assignment_id}
async fn get_assignment(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(assignment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let assignment = state
        .engine()
        .get_assignment(&assignment_id)
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(AssignmentResponse::from(assignment)))
}
