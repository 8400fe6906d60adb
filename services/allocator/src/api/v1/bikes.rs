//! Bike endpoints: listing, assignment and release.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{invalid_body, AssignmentResponse, BikeResponse, ListResponse};
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_bikes))
        .route("/available", get(list_available_bikes))
        .route("/assign", post(assign_bike))
        .route("/unassign", post(unassign_bike))
        .route("/{bike_id}", get(get_bike))
}

#[derive(Debug, Deserialize)]
pub struct AssignBikeRequest {
    #[serde(default, alias = "user_uuid")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UnassignBikeRequest {
    #[serde(default, alias = "user_uuid")]
    pub user_id: String,
    #[serde(default, alias = "bike_uuid")]
    pub bike_id: String,
}

/// GET /v1/bikes
async fn list_bikes(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let bikes = state
        .engine()
        .list_resources()
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(ListResponse::<BikeResponse>::collect_from(bikes)))
}

/// GET /v1/bikes/available
///
/// Ordered the way `assign` would pick them.
async fn list_available_bikes(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine();
    let bikes = engine
        .list_available_resources(engine.now())
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(ListResponse::<BikeResponse>::collect_from(bikes)))
}

/// GET /v1/bikes/{bike_id}
async fn get_bike(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(bike_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bike = state
        .engine()
        .get_resource(&bike_id)
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(BikeResponse::from(bike)))
}

/// POST /v1/bikes/assign
async fn assign_bike(
    ctx: RequestContext,
    State(state): State<AppState>,
    payload: Result<Json<AssignBikeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| invalid_body(e, &ctx.request_id))?;

    let assignment = state
        .engine()
        .assign(&req.user_id)
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok((StatusCode::CREATED, Json(AssignmentResponse::from(assignment))))
}

/// POST /v1/bikes/unassign
async fn unassign_bike(
    ctx: RequestContext,
    State(state): State<AppState>,
    payload: Result<Json<UnassignBikeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| invalid_body(e, &ctx.request_id))?;

    let assignment = state
        .engine()
        .release(&req.user_id, &req.bike_id)
        .await
        .map_err(|e| ApiError::from_allocation(e, &ctx.request_id))?;

    Ok(Json(AssignmentResponse::from(assignment)))
}
