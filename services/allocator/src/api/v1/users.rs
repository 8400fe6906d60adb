use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use super::AssignmentResponse;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/{user_id}/assignment", get(get_current_assignment))
}

#[derive(Debug, Serialize)]
pub struct CurrentAssignmentResponse {
    /// The open assignment, or null when the user holds nothing.
    pub assignment: Option<AssignmentResponse>,
}

/// GET /v1/users/{user_id}/assignment
async fn get_current_assignment(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let assignment = state
        .engine()
        .current_assignment(&user_id)
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(CurrentAssignmentResponse {
        assignment: assignment.map(AssignmentResponse::from),
    }))
}
