//! Engine error taxonomy.

use bikepool_id::{ActorId, AssignmentId, BikeId};
use thiserror::Error;

use crate::store::StoreError;

/// Why an engine operation did not happen.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Missing or malformed caller input. Never retried.
    #[error("invalid {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The referenced entity does not exist, or nothing satisfies the request.
    #[error(transparent)]
    NotFound(NotFoundKind),

    /// Role policy forbids the operation. Never retried.
    #[error(transparent)]
    Forbidden(ForbiddenReason),

    /// Proceeding would break an allocation invariant.
    #[error(transparent)]
    Conflict(ConflictReason),

    /// Infrastructure failure, passed through untouched.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundKind {
    #[error("user '{0}' not found")]
    Actor(String),

    #[error("no bike is available")]
    NoBikeAvailable,

    #[error("bike {bike_id} is not assigned to user {actor_id}")]
    NoMatchingOpenAssignment { actor_id: ActorId, bike_id: BikeId },

    #[error("bike '{0}' not found")]
    Bike(String),

    #[error("assignment '{0}' not found")]
    Assignment(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForbiddenReason {
    #[error("user {0} is an admin and cannot be assigned a bike")]
    AdminCannotHold(ActorId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictReason {
    #[error("user already holds bike {bike_id} (assignment {assignment_id})")]
    AlreadyHolding {
        assignment_id: AssignmentId,
        bike_id: BikeId,
    },

    #[error("lost the race for a bike {attempts} times; try again")]
    SelectionContention { attempts: u32 },
}

impl AllocationError {
    pub(crate) fn invalid(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::NotFound(NotFoundKind::Actor(_)) => "user_not_found",
            Self::NotFound(NotFoundKind::NoBikeAvailable) => "no_bike_available",
            Self::NotFound(NotFoundKind::NoMatchingOpenAssignment { .. }) => {
                "assignment_not_open"
            }
            Self::NotFound(NotFoundKind::Bike(_)) => "bike_not_found",
            Self::NotFound(NotFoundKind::Assignment(_)) => "assignment_not_found",
            Self::Forbidden(ForbiddenReason::AdminCannotHold(_)) => "admin_cannot_hold",
            Self::Conflict(ConflictReason::AlreadyHolding { .. }) => "already_holding",
            Self::Conflict(ConflictReason::SelectionContention { .. }) => "selection_contention",
            Self::Store(_) => "internal_error",
        }
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(ConflictReason::SelectionContention { .. }) | Self::Store(_)
        )
    }
}
