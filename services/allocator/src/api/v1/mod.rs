//! API v1 routes.

mod assignments;
mod bikes;
mod users;

use axum::extract::rejection::JsonRejection;
use axum::Router;
use bikepool_id::{ActorId, AssignmentId, BikeId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::error::ApiError;
use crate::model::{Assignment, Bike};
use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/bikes", bikes::routes())
        .nest("/assignments", assignments::routes())
        .nest("/users", users::routes())
}

/// A bike as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct BikeResponse {
    pub id: BikeId,
    pub is_assigned: bool,
    pub usage_count: i64,
    pub last_unassigned: Option<DateTime<Utc>>,
}

impl From<Bike> for BikeResponse {
    fn from(bike: Bike) -> Self {
        Self {
            id: bike.id,
            is_assigned: bike.held,
            usage_count: bike.usage_count,
            last_unassigned: bike.last_released_at,
        }
    }
}

/// An assignment as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub id: AssignmentId,
    pub user_id: ActorId,
    pub bike_id: BikeId,
    pub assigned_at: DateTime<Utc>,
    pub unassigned_at: Option<DateTime<Utc>>,
}

impl From<Assignment> for AssignmentResponse {
    fn from(assignment: Assignment) -> Self {
        Self {
            id: assignment.id,
            user_id: assignment.actor_id,
            bike_id: assignment.bike_id,
            assigned_at: assignment.assigned_at,
            unassigned_at: assignment.released_at,
        }
    }
}

/// Response for list endpoints.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> ListResponse<T> {
    fn collect_from<S: Into<T>>(items: impl IntoIterator<Item = S>) -> Self {
        let items: Vec<T> = items.into_iter().map(Into::into).collect();
        let total = items.len();
        Self { items, total }
    }
}

fn invalid_body(rejection: JsonRejection, request_id: &str) -> ApiError {
    ApiError::bad_request("invalid_body", rejection.body_text()).with_request_id(request_id)
}
