//! Allocation store: the source of truth for bikes and assignments.
//!
//! Every mutation the engine performs goes through one of two atomic
//! conditional operations:
//! - [`AllocationStore::commit_assignment`] re-checks at commit time that the
//!   bike is still free and cooled down and that the actor still holds
//!   nothing, then bumps the usage count, marks the bike held and opens the
//!   assignment.
//! - [`AllocationStore::close_assignment`] closes exactly one open
//!   assignment and frees its bike, or does nothing if it is already closed.
//!
//! Both either apply completely or not at all. Everything else is a read.

mod error;
mod memory;
mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryAllocationStore;
pub use postgres::PgAllocationStore;

use async_trait::async_trait;
use bikepool_id::{ActorId, AssignmentId, BikeId};
use chrono::{DateTime, Utc};

use crate::model::{Actor, Assignment, Bike};

/// Outcome of [`AllocationStore::commit_assignment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignCommit {
    /// The assignment was created.
    Committed(Assignment),
    /// The bike was taken or released again since it was selected.
    /// Retryable with a fresh selection.
    BikeUnavailable,
    /// The actor already has an open assignment.
    ActorHolding,
}

/// Which open assignment [`AllocationStore::close_assignment`] closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTarget {
    /// The open assignment of this actor on this bike (user release).
    Held { actor_id: ActorId, bike_id: BikeId },
    /// This specific assignment row, provided it still belongs to the actor
    /// and is still open (overdue reclaim).
    Assignment {
        assignment_id: AssignmentId,
        actor_id: ActorId,
    },
}

#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Cheap reachability check used by readiness.
    async fn ping(&self) -> StoreResult<()>;

    async fn find_actor(&self, actor_id: &ActorId) -> StoreResult<Option<Actor>>;

    async fn find_bike(&self, bike_id: &BikeId) -> StoreResult<Option<Bike>>;

    async fn find_assignment(&self, assignment_id: AssignmentId)
        -> StoreResult<Option<Assignment>>;

    /// The actor's open assignment, if any.
    async fn find_open_assignment(&self, actor_id: &ActorId) -> StoreResult<Option<Assignment>>;

    /// All bikes ordered by id.
    async fn list_bikes(&self) -> StoreResult<Vec<Bike>>;

    /// Unheld bikes never released or released at or before `cooled_before`,
    /// ordered by `(usage_count, id)`.
    async fn list_eligible_bikes(&self, cooled_before: DateTime<Utc>) -> StoreResult<Vec<Bike>>;

    /// All assignments, open and closed, ordered by id.
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>>;

    /// Open assignments created strictly before `assigned_before`, ordered by id.
    async fn list_overdue_assignments(
        &self,
        assigned_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Assignment>>;

    /// Atomically hand `bike_id` to `actor_id` at `now`.
    ///
    /// The bike must still be unheld and released at or before
    /// `cooled_before` when the change is applied.
    async fn commit_assignment(
        &self,
        actor_id: &ActorId,
        bike_id: &BikeId,
        cooled_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<AssignCommit>;

    /// Atomically close the targeted open assignment at `now` and free its
    /// bike. Returns the closed assignment, or `None` if nothing matched.
    async fn close_assignment(
        &self,
        target: CloseTarget,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Assignment>>;

    /// Provision an actor. Returns false if the id already exists.
    async fn insert_actor(&self, actor: &Actor) -> StoreResult<bool>;

    /// Add an unused bike to the pool. Returns false if the id already exists.
    async fn insert_bike(&self, bike_id: &BikeId) -> StoreResult<bool>;
}
