//! Allocation engine.
//!
//! The engine is stateless between calls: every operation reads the store
//! afresh and applies its change through one of the store's atomic
//! conditional operations. Clones share the same store and clock, so any
//! number of request handlers (and engine instances against the same
//! database) may call it concurrently.

mod error;
pub mod policy;

pub use error::{AllocationError, ConflictReason, ForbiddenReason, NotFoundKind};

use std::sync::Arc;

use bikepool_id::{ActorId, AssignmentId, BikeId, IdError};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::model::{Actor, Assignment, Bike};
use crate::store::{AllocationStore, AssignCommit, CloseTarget};

/// Tunables for selection and reclaim.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum rest between a release and the next assignment of that bike.
    pub cooldown: Duration,
    /// Open assignments older than this are reclaimed by the sweep.
    pub overdue_threshold: Duration,
    /// Selections tried before a lost commit race surfaces as a conflict.
    pub assign_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::minutes(5),
            overdue_threshold: Duration::hours(24),
            assign_max_attempts: 3,
        }
    }
}

/// Counts from one overdue sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Open assignments past the threshold when the sweep started.
    pub overdue: usize,
    /// Assignments this sweep closed.
    pub reclaimed: usize,
    /// Assignments closed by someone else before the sweep reached them.
    pub already_resolved: usize,
    /// Assignments whose close failed; retried next sweep.
    pub failed: usize,
    /// The overdue scan itself failed, so nothing was attempted.
    pub scan_failed: bool,
}

#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn AllocationStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn AllocationStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn AllocationStore {
        self.store.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Give `actor_id` the least-used available bike.
    #[instrument(skip(self))]
    pub async fn assign(&self, actor_id: &str) -> Result<Assignment, AllocationError> {
        let actor = self.require_actor(actor_id).await?;

        if !actor.role.can_hold() {
            return Err(AllocationError::Forbidden(
                ForbiddenReason::AdminCannotHold(actor.id),
            ));
        }

        if let Some(open) = self.store.find_open_assignment(&actor.id).await? {
            return Err(already_holding(&open));
        }

        let attempts = self.config.assign_max_attempts.max(1);
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let cutoff = policy::cooled_before(now, self.config.cooldown);

            let candidates = self.store.list_eligible_bikes(cutoff).await?;
            let Some(bike) = policy::select_least_used(&candidates, now, self.config.cooldown)
            else {
                return Err(AllocationError::NotFound(NotFoundKind::NoBikeAvailable));
            };

            match self
                .store
                .commit_assignment(&actor.id, &bike.id, cutoff, now)
                .await?
            {
                AssignCommit::Committed(assignment) => {
                    info!(
                        assignment_id = %assignment.id,
                        actor_id = %assignment.actor_id,
                        bike_id = %assignment.bike_id,
                        usage_count = bike.usage_count + 1,
                        "Bike assigned"
                    );
                    return Ok(assignment);
                }
                AssignCommit::ActorHolding => {
                    // A concurrent request from the same actor won.
                    let open = self.store.find_open_assignment(&actor.id).await?;
                    return Err(match open {
                        Some(open) => already_holding(&open),
                        None => AllocationError::Conflict(ConflictReason::SelectionContention {
                            attempts: attempt,
                        }),
                    });
                }
                AssignCommit::BikeUnavailable => {
                    debug!(bike_id = %bike.id, attempt, "Selected bike was taken, reselecting");
                }
            }
        }

        warn!(actor_id = %actor.id, attempts, "Gave up assigning after repeated commit races");
        Err(AllocationError::Conflict(
            ConflictReason::SelectionContention { attempts },
        ))
    }

    /// Return `bike_id` from `actor_id` to the pool.
    ///
    /// Returns the closed assignment.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        actor_id: &str,
        bike_id: &str,
    ) -> Result<Assignment, AllocationError> {
        let actor_id = parse_input::<ActorId>("user_id", actor_id)?;
        let bike_id = parse_input::<BikeId>("bike_id", bike_id)?;

        let now = self.clock.now();
        let closed = self
            .store
            .close_assignment(CloseTarget::Held { actor_id, bike_id }, now)
            .await?;

        match closed {
            Some(assignment) => {
                info!(
                    assignment_id = %assignment.id,
                    actor_id = %actor_id,
                    bike_id = %bike_id,
                    "Bike released"
                );
                Ok(assignment)
            }
            None => Err(AllocationError::NotFound(
                NotFoundKind::NoMatchingOpenAssignment { actor_id, bike_id },
            )),
        }
    }

    /// Close every assignment open for longer than the overdue threshold.
    ///
    /// Never fails: each assignment is closed independently and problems are
    /// logged and counted in the report.
    #[instrument(skip(self))]
    pub async fn reclaim_overdue(&self, now: DateTime<Utc>) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        let assigned_before = policy::window_start(now, self.config.overdue_threshold);

        debug!(%assigned_before, "Scanning for overdue assignments");

        let overdue = match self.store.list_overdue_assignments(assigned_before).await {
            Ok(overdue) => overdue,
            Err(e) => {
                error!(error = %e, "Failed to list overdue assignments");
                report.scan_failed = true;
                return report;
            }
        };
        report.overdue = overdue.len();

        for assignment in overdue {
            let target = CloseTarget::Assignment {
                assignment_id: assignment.id,
                actor_id: assignment.actor_id,
            };
            match self.store.close_assignment(target, now).await {
                Ok(Some(closed)) => {
                    info!(
                        assignment_id = %closed.id,
                        actor_id = %closed.actor_id,
                        bike_id = %closed.bike_id,
                        assigned_at = %closed.assigned_at,
                        "Reclaimed overdue bike"
                    );
                    report.reclaimed += 1;
                }
                Ok(None) => {
                    debug!(assignment_id = %assignment.id, "Overdue assignment already closed");
                    report.already_resolved += 1;
                }
                Err(e) => {
                    error!(
                        error = %e,
                        assignment_id = %assignment.id,
                        actor_id = %assignment.actor_id,
                        "Failed to reclaim overdue bike"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Every bike, ordered by id.
    pub async fn list_resources(&self) -> Result<Vec<Bike>, AllocationError> {
        Ok(self.store.list_bikes().await?)
    }

    /// Bikes `assign` could pick at `now`, in the order it would pick them.
    pub async fn list_available_resources(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bike>, AllocationError> {
        let cutoff = policy::cooled_before(now, self.config.cooldown);
        let mut bikes = self.store.list_eligible_bikes(cutoff).await?;
        bikes.retain(|b| b.is_available(now, self.config.cooldown));
        Ok(bikes)
    }

    /// Every assignment, open and closed, ordered by id.
    pub async fn list_assignments(&self) -> Result<Vec<Assignment>, AllocationError> {
        Ok(self.store.list_assignments().await?)
    }

    pub async fn get_resource(&self, bike_id: &str) -> Result<Bike, AllocationError> {
        let id = parse_input::<BikeId>("bike_id", bike_id)?;
        self.store
            .find_bike(&id)
            .await?
            .ok_or_else(|| AllocationError::NotFound(NotFoundKind::Bike(id.to_string())))
    }

    pub async fn get_assignment(&self, assignment_id: &str) -> Result<Assignment, AllocationError> {
        let id = parse_input::<AssignmentId>("assignment_id", assignment_id)?;
        self.store.find_assignment(id).await?.ok_or_else(|| {
            AllocationError::NotFound(NotFoundKind::Assignment(id.to_string()))
        })
    }

    /// The actor's open assignment, if any.
    pub async fn current_assignment(
        &self,
        actor_id: &str,
    ) -> Result<Option<Assignment>, AllocationError> {
        let actor = self.require_actor(actor_id).await?;
        Ok(self.store.find_open_assignment(&actor.id).await?)
    }

    async fn require_actor(&self, raw: &str) -> Result<Actor, AllocationError> {
        let actor_id = match ActorId::parse(raw) {
            Ok(id) => id,
            Err(IdError::Empty) => return Err(AllocationError::invalid("user_id", IdError::Empty)),
            // A malformed id cannot name a provisioned user.
            Err(_) => {
                return Err(AllocationError::NotFound(NotFoundKind::Actor(
                    raw.trim().to_string(),
                )))
            }
        };

        self.store
            .find_actor(&actor_id)
            .await?
            .ok_or_else(|| AllocationError::NotFound(NotFoundKind::Actor(actor_id.to_string())))
    }
}

fn already_holding(open: &Assignment) -> AllocationError {
    AllocationError::Conflict(ConflictReason::AlreadyHolding {
        assignment_id: open.id,
        bike_id: open.bike_id,
    })
}

fn parse_input<T>(field: &'static str, raw: &str) -> Result<T, AllocationError>
where
    T: std::str::FromStr<Err = IdError>,
{
    raw.parse::<T>()
        .map_err(|e| AllocationError::invalid(field, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Role;
    use crate::store::MemoryAllocationStore;
    use chrono::TimeZone;

    struct Harness {
        engine: AllocationEngine,
        store: Arc<MemoryAllocationStore>,
        clock: Arc<ManualClock>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryAllocationStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = AllocationEngine::new(store.clone(), clock.clone(), EngineConfig::default());
        Harness {
            engine,
            store,
            clock,
        }
    }

    async fn add_actor(store: &MemoryAllocationStore, role: Role) -> ActorId {
        let actor = Actor {
            id: ActorId::new(),
            name: format!("{role}-user"),
            role,
        };
        store.insert_actor(&actor).await.unwrap();
        actor.id
    }

    async fn add_bikes(store: &MemoryAllocationStore, n: usize) -> Vec<BikeId> {
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = BikeId::new();
            store.insert_bike(&id).await.unwrap();
            ids.push(id);
        }
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_assign_checks_run_in_order() {
        let h = harness();
        let admin = add_actor(&h.store, Role::Admin).await;

        // No bikes at all, yet the admin check still wins over availability.
        let err = h.engine.assign(&admin.to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::Forbidden(ForbiddenReason::AdminCannotHold(id)) if id == admin
        ));

        let customer = add_actor(&h.store, Role::Customer).await;
        let err = h.engine.assign(&customer.to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NotFound(NotFoundKind::NoBikeAvailable)
        ));
    }

    #[tokio::test]
    async fn test_assign_unknown_and_blank_users() {
        let h = harness();
        add_bikes(&h.store, 1).await;

        let err = h.engine.assign(&ActorId::new().to_string()).await.unwrap_err();
        assert!(matches!(err, AllocationError::NotFound(NotFoundKind::Actor(_))));

        let err = h.engine.assign("not-an-id").await.unwrap_err();
        assert!(matches!(err, AllocationError::NotFound(NotFoundKind::Actor(_))));

        let err = h.engine.assign("  ").await.unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InvalidInput {
                field: "user_id",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_second_assign_conflicts_with_open_assignment() {
        let h = harness();
        let actor = add_actor(&h.store, Role::Customer).await;
        add_bikes(&h.store, 2).await;

        let first = h.engine.assign(&actor.to_string()).await.unwrap();
        let err = h.engine.assign(&actor.to_string()).await.unwrap_err();
        match err {
            AllocationError::Conflict(ConflictReason::AlreadyHolding {
                assignment_id,
                bike_id,
            }) => {
                assert_eq!(assignment_id, first.id);
                assert_eq!(bike_id, first.bike_id);
            }
            other => panic!("expected AlreadyHolding, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_validates_input_before_store_access() {
        let h = harness();
        let actor = add_actor(&h.store, Role::Customer).await;

        let err = h.engine.release("", &BikeId::new().to_string()).await.unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput { field: "user_id", .. }));

        let err = h.engine.release(&actor.to_string(), "").await.unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput { field: "bike_id", .. }));

        let err = h
            .engine
            .release(&actor.to_string(), "usr_01JAFW5Q8R3T9V2X4Y6Z7A1B0C")
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput { field: "bike_id", .. }));
    }

    #[tokio::test]
    async fn test_release_requires_exact_holder() {
        let h = harness();
        let alice = add_actor(&h.store, Role::Customer).await;
        let bob = add_actor(&h.store, Role::Customer).await;
        add_bikes(&h.store, 2).await;

        let held = h.engine.assign(&alice.to_string()).await.unwrap();

        let err = h
            .engine
            .release(&bob.to_string(), &held.bike_id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::NotFound(NotFoundKind::NoMatchingOpenAssignment { .. })
        ));

        h.clock.advance(Duration::minutes(30));
        let closed = h
            .engine
            .release(&alice.to_string(), &held.bike_id.to_string())
            .await
            .unwrap();
        assert_eq!(closed.id, held.id);
        assert_eq!(closed.released_at, Some(t0() + Duration::minutes(30)));

        let bike = h.engine.get_resource(&held.bike_id.to_string()).await.unwrap();
        assert!(!bike.held);
        assert_eq!(bike.usage_count, 1);
        assert_eq!(bike.last_released_at, closed.released_at);
    }

    #[tokio::test]
    async fn test_available_list_matches_selection_order() {
        let h = harness();
        let actor = add_actor(&h.store, Role::Customer).await;
        let bikes = add_bikes(&h.store, 3).await;

        let first = h.engine.assign(&actor.to_string()).await.unwrap();
        assert_eq!(first.bike_id, bikes[0]);
        h.engine
            .release(&actor.to_string(), &bikes[0].to_string())
            .await
            .unwrap();

        let now = h.engine.now();
        let available: Vec<BikeId> = h
            .engine
            .list_available_resources(now)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(available, vec![bikes[1], bikes[2]]);

        let later: Vec<BikeId> = h
            .engine
            .list_available_resources(now + Duration::minutes(5))
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(later, vec![bikes[1], bikes[2], bikes[0]]);
    }

    #[tokio::test]
    async fn test_reclaim_threshold_is_strict() {
        let h = harness();
        let actor = add_actor(&h.store, Role::Customer).await;
        add_bikes(&h.store, 1).await;
        h.engine.assign(&actor.to_string()).await.unwrap();

        let exactly_due = t0() + Duration::hours(24);
        let report = h.engine.reclaim_overdue(exactly_due).await;
        assert_eq!(report, ReclaimReport::default());

        let report = h.engine.reclaim_overdue(exactly_due + Duration::seconds(1)).await;
        assert_eq!(report.overdue, 1);
        assert_eq!(report.reclaimed, 1);
        assert!(h.engine.current_assignment(&actor.to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_windows_do_not_overflow() {
        let store = Arc::new(MemoryAllocationStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = EngineConfig {
            cooldown: Duration::MAX,
            overdue_threshold: Duration::MAX,
            ..EngineConfig::default()
        };
        let engine = AllocationEngine::new(store.clone(), clock.clone(), config);
        let actor = add_actor(&store, Role::Customer).await;
        let bikes = add_bikes(&store, 2).await;

        let assignment = engine.assign(&actor.to_string()).await.unwrap();
        assert_eq!(assignment.bike_id, bikes[0]);
        engine
            .release(&actor.to_string(), &bikes[0].to_string())
            .await
            .unwrap();

        clock.advance(Duration::days(3650));
        let available: Vec<BikeId> = engine
            .list_available_resources(engine.now())
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(available, vec![bikes[1]]);

        engine.assign(&actor.to_string()).await.unwrap();
        let report = engine.reclaim_overdue(engine.now()).await;
        assert_eq!(report, ReclaimReport::default());
    }

    #[tokio::test]
    async fn test_get_assignment_parses_numeric_ids() {
        let h = harness();
        let actor = add_actor(&h.store, Role::Customer).await;
        add_bikes(&h.store, 1).await;
        let assignment = h.engine.assign(&actor.to_string()).await.unwrap();

        let fetched = h.engine.get_assignment(&assignment.id.to_string()).await.unwrap();
        assert_eq!(fetched, assignment);

        let err = h.engine.get_assignment("99").await.unwrap_err();
        assert!(matches!(err, AllocationError::NotFound(NotFoundKind::Assignment(_))));

        let err = h.engine.get_assignment("first").await.unwrap_err();
        assert!(matches!(err, AllocationError::InvalidInput { .. }));
    }
}
