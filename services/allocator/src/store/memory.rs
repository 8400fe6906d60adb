//! In-process store.
//!
//! All state sits behind one `RwLock`; each conditional mutation runs its
//! checks and writes under a single write guard, which gives the same
//! all-or-nothing behavior as a transaction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bikepool_id::{ActorId, AssignmentId, BikeId};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AllocationStore, AssignCommit, CloseTarget, StoreResult};
use crate::model::{Actor, Assignment, Bike};

#[derive(Debug, Default)]
struct MemoryState {
    actors: BTreeMap<ActorId, Actor>,
    bikes: BTreeMap<BikeId, Bike>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    last_assignment_id: i64,
}

impl MemoryState {
    fn open_assignment_of(&self, actor_id: &ActorId) -> Option<&Assignment> {
        self.assignments
            .values()
            .find(|a| a.is_open() && a.actor_id == *actor_id)
    }
}

/// Store backed by process memory. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryAllocationStore {
    state: RwLock<MemoryState>,
}

impl MemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AllocationStore for MemoryAllocationStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_actor(&self, actor_id: &ActorId) -> StoreResult<Option<Actor>> {
        Ok(self.state.read().await.actors.get(actor_id).cloned())
    }

    async fn find_bike(&self, bike_id: &BikeId) -> StoreResult<Option<Bike>> {
        Ok(self.state.read().await.bikes.get(bike_id).cloned())
    }

    async fn find_assignment(
        &self,
        assignment_id: AssignmentId,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .get(&assignment_id)
            .cloned())
    }

    async fn find_open_assignment(&self, actor_id: &ActorId) -> StoreResult<Option<Assignment>> {
        Ok(self.state.read().await.open_assignment_of(actor_id).cloned())
    }

    async fn list_bikes(&self) -> StoreResult<Vec<Bike>> {
        Ok(self.state.read().await.bikes.values().cloned().collect())
    }

    async fn list_eligible_bikes(&self, cooled_before: DateTime<Utc>) -> StoreResult<Vec<Bike>> {
        let state = self.state.read().await;
        let mut bikes: Vec<Bike> = state
            .bikes
            .values()
            .filter(|b| !b.held && b.last_released_at.is_none_or(|t| t <= cooled_before))
            .cloned()
            .collect();
        bikes.sort_by_key(|b| (b.usage_count, b.id));
        Ok(bikes)
    }

    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .values()
            .cloned()
            .collect())
    }

    async fn list_overdue_assignments(
        &self,
        assigned_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Assignment>> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .values()
            .filter(|a| a.is_open() && a.assigned_at < assigned_before)
            .cloned()
            .collect())
    }

    async fn commit_assignment(
        &self,
        actor_id: &ActorId,
        bike_id: &BikeId,
        cooled_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<AssignCommit> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.open_assignment_of(actor_id).is_some() {
            return Ok(AssignCommit::ActorHolding);
        }

        let Some(bike) = state.bikes.get_mut(bike_id) else {
            return Ok(AssignCommit::BikeUnavailable);
        };
        if bike.held || bike.last_released_at.is_some_and(|t| t > cooled_before) {
            return Ok(AssignCommit::BikeUnavailable);
        }

        bike.held = true;
        bike.usage_count += 1;

        state.last_assignment_id += 1;
        let assignment = Assignment {
            id: AssignmentId::new(state.last_assignment_id),
            actor_id: *actor_id,
            bike_id: *bike_id,
            assigned_at: now,
            released_at: None,
        };
        state
            .assignments
            .insert(assignment.id, assignment.clone());

        Ok(AssignCommit::Committed(assignment))
    }

    async fn close_assignment(
        &self,
        target: CloseTarget,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Assignment>> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let found = state.assignments.values_mut().find(|a| {
            a.is_open()
                && match target {
                    CloseTarget::Held { actor_id, bike_id } => {
                        a.actor_id == actor_id && a.bike_id == bike_id
                    }
                    CloseTarget::Assignment {
                        assignment_id,
                        actor_id,
                    } => a.id == assignment_id && a.actor_id == actor_id,
                }
        });
        let Some(assignment) = found else {
            return Ok(None);
        };

        assignment.released_at = Some(now);
        if let Some(bike) = state.bikes.get_mut(&assignment.bike_id) {
            bike.held = false;
            bike.last_released_at = Some(now);
        }

        Ok(Some(assignment.clone()))
    }

    async fn insert_actor(&self, actor: &Actor) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.actors.contains_key(&actor.id) {
            return Ok(false);
        }
        state.actors.insert(actor.id, actor.clone());
        Ok(true)
    }

    async fn insert_bike(&self, bike_id: &BikeId) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.bikes.contains_key(bike_id) {
            return Ok(false);
        }
        state.bikes.insert(*bike_id, Bike::new(*bike_id));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    async fn store_with(bikes: usize) -> (MemoryAllocationStore, Actor, Vec<BikeId>) {
        let store = MemoryAllocationStore::new();
        let actor = Actor {
            id: ActorId::new(),
            name: "alice".to_string(),
            role: Role::Customer,
        };
        store.insert_actor(&actor).await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..bikes {
            let id = BikeId::new();
            store.insert_bike(&id).await.unwrap();
            ids.push(id);
        }
        ids.sort();
        (store, actor, ids)
    }

    #[tokio::test]
    async fn test_commit_marks_bike_held_and_counts_usage() {
        let (store, actor, bikes) = store_with(1).await;

        let outcome = store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap();
        let AssignCommit::Committed(assignment) = outcome else {
            panic!("expected commit, got {outcome:?}");
        };
        assert_eq!(assignment.id, AssignmentId::new(1));
        assert!(assignment.is_open());

        let bike = store.find_bike(&bikes[0]).await.unwrap().unwrap();
        assert!(bike.held);
        assert_eq!(bike.usage_count, 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_held_bike_and_holding_actor() {
        let (store, actor, bikes) = store_with(2).await;
        store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap();

        let other = Actor {
            id: ActorId::new(),
            name: "bob".to_string(),
            role: Role::Customer,
        };
        store.insert_actor(&other).await.unwrap();

        assert_eq!(
            store
                .commit_assignment(&other.id, &bikes[0], t0(), t0())
                .await
                .unwrap(),
            AssignCommit::BikeUnavailable
        );
        assert_eq!(
            store
                .commit_assignment(&actor.id, &bikes[1], t0(), t0())
                .await
                .unwrap(),
            AssignCommit::ActorHolding
        );

        let untouched = store.find_bike(&bikes[1]).await.unwrap().unwrap();
        assert_eq!(untouched, Bike::new(bikes[1]));
    }

    #[tokio::test]
    async fn test_commit_rechecks_cooldown() {
        let (store, actor, bikes) = store_with(1).await;
        store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap();
        let released_at = t0() + Duration::minutes(10);
        store
            .close_assignment(
                CloseTarget::Held {
                    actor_id: actor.id,
                    bike_id: bikes[0],
                },
                released_at,
            )
            .await
            .unwrap()
            .unwrap();

        // Selection was made against an older cut-off: the bike has been
        // released since, so it is still cooling down.
        let outcome = store
            .commit_assignment(&actor.id, &bikes[0], released_at - Duration::seconds(1), released_at)
            .await
            .unwrap();
        assert_eq!(outcome, AssignCommit::BikeUnavailable);
    }

    #[tokio::test]
    async fn test_close_is_single_shot() {
        let (store, actor, bikes) = store_with(1).await;
        let AssignCommit::Committed(assignment) = store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap()
        else {
            panic!("expected commit");
        };

        let target = CloseTarget::Assignment {
            assignment_id: assignment.id,
            actor_id: actor.id,
        };
        let later = t0() + Duration::hours(1);
        let closed = store.close_assignment(target, later).await.unwrap().unwrap();
        assert_eq!(closed.released_at, Some(later));

        assert!(store
            .close_assignment(target, later + Duration::hours(1))
            .await
            .unwrap()
            .is_none());

        let bike = store.find_bike(&bikes[0]).await.unwrap().unwrap();
        assert!(!bike.held);
        assert_eq!(bike.last_released_at, Some(later));
    }

    #[tokio::test]
    async fn test_close_by_assignment_requires_matching_actor() {
        let (store, actor, bikes) = store_with(1).await;
        let AssignCommit::Committed(assignment) = store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap()
        else {
            panic!("expected commit");
        };

        let wrong = CloseTarget::Assignment {
            assignment_id: assignment.id,
            actor_id: ActorId::new(),
        };
        assert!(store.close_assignment(wrong, t0()).await.unwrap().is_none());
        assert!(store.find_bike(&bikes[0]).await.unwrap().unwrap().held);
    }

    #[tokio::test]
    async fn test_eligible_bikes_sorted_by_usage_then_id() {
        let (store, actor, bikes) = store_with(3).await;
        // Use bikes[0] once so it sorts last.
        store
            .commit_assignment(&actor.id, &bikes[0], t0(), t0())
            .await
            .unwrap();
        store
            .close_assignment(
                CloseTarget::Held {
                    actor_id: actor.id,
                    bike_id: bikes[0],
                },
                t0(),
            )
            .await
            .unwrap();

        let eligible = store.list_eligible_bikes(t0()).await.unwrap();
        let order: Vec<BikeId> = eligible.iter().map(|b| b.id).collect();
        assert_eq!(order, vec![bikes[1], bikes[2], bikes[0]]);

        let cooling = store
            .list_eligible_bikes(t0() - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(cooling.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let (store, actor, bikes) = store_with(1).await;
        assert!(!store.insert_actor(&actor).await.unwrap());
        assert!(!store.insert_bike(&bikes[0]).await.unwrap());
    }
}
