//! Postgres-backed store.
//!
//! Conditional mutations run in a single transaction each. Concurrent
//! claims on the same bike serialize on its row lock: the loser's `UPDATE`
//! re-evaluates `NOT is_assigned` after the winner commits and matches
//! nothing. The partial unique indexes on open assignments back up the
//! one-open-assignment-per-user and per-bike rules.

use async_trait::async_trait;
use bikepool_id::{ActorId, AssignmentId, BikeId};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{AllocationStore, AssignCommit, CloseTarget, StoreError, StoreResult};
use crate::db::{Database, DbError};
use crate::model::{Actor, Assignment, Bike, Role};

const OPEN_USER_INDEX: &str = "assignments_open_user_idx";

const BIKE_COLUMNS: &str = "id, is_assigned, usage_count, last_unassigned";
const ASSIGNMENT_COLUMNS: &str = "id, user_id, bike_id, assigned_at, unassigned_at";

/// Store backed by the `users`, `bikes` and `assignments` tables.
#[derive(Clone)]
pub struct PgAllocationStore {
    pool: PgPool,
}

impl PgAllocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Database {
    /// Get an allocation store handle.
    pub fn allocation_store(&self) -> PgAllocationStore {
        PgAllocationStore::new(self.pool().clone())
    }
}

#[async_trait]
impl AllocationStore for PgAllocationStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    async fn find_actor(&self, actor_id: &ActorId) -> StoreResult<Option<Actor>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, name, role FROM users WHERE id = $1")
            .bind(actor_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)?;

        row.map(Actor::try_from).transpose()
    }

    async fn find_bike(&self, bike_id: &BikeId) -> StoreResult<Option<Bike>> {
        let row = sqlx::query_as::<_, BikeRow>(&format!(
            "SELECT {BIKE_COLUMNS} FROM bikes WHERE id = $1"
        ))
        .bind(bike_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(Bike::try_from).transpose()
    }

    async fn find_assignment(
        &self,
        assignment_id: AssignmentId,
    ) -> StoreResult<Option<Assignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1"
        ))
        .bind(assignment_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(Assignment::try_from).transpose()
    }

    async fn find_open_assignment(&self, actor_id: &ActorId) -> StoreResult<Option<Assignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments \
             WHERE user_id = $1 AND unassigned_at IS NULL"
        ))
        .bind(actor_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(Assignment::try_from).transpose()
    }

    async fn list_bikes(&self) -> StoreResult<Vec<Bike>> {
        let rows = sqlx::query_as::<_, BikeRow>(&format!(
            r#"SELECT {BIKE_COLUMNS} FROM bikes ORDER BY id COLLATE "C""#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(Bike::try_from).collect()
    }

    async fn list_eligible_bikes(&self, cooled_before: DateTime<Utc>) -> StoreResult<Vec<Bike>> {
        let rows = sqlx::query_as::<_, BikeRow>(&format!(
            r#"
            SELECT {BIKE_COLUMNS}
            FROM bikes
            WHERE NOT is_assigned
              AND (last_unassigned IS NULL OR last_unassigned <= $1)
            ORDER BY usage_count ASC, id COLLATE "C" ASC
            "#
        ))
        .bind(cooled_before)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(Bike::try_from).collect()
    }

    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(Assignment::try_from).collect()
    }

    async fn list_overdue_assignments(
        &self,
        assigned_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Assignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(&format!(
            r#"
            SELECT {ASSIGNMENT_COLUMNS}
            FROM assignments
            WHERE unassigned_at IS NULL AND assigned_at < $1
            ORDER BY id
            "#
        ))
        .bind(assigned_before)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Query)?;

        rows.into_iter().map(Assignment::try_from).collect()
    }

    async fn commit_assignment(
        &self,
        actor_id: &ActorId,
        bike_id: &BikeId,
        cooled_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<AssignCommit> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let holding: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM assignments WHERE user_id = $1 AND unassigned_at IS NULL",
        )
        .bind(actor_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if holding.is_some() {
            return Ok(AssignCommit::ActorHolding);
        }

        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE bikes
            SET is_assigned = true, usage_count = usage_count + 1
            WHERE id = $1
              AND NOT is_assigned
              AND (last_unassigned IS NULL OR last_unassigned <= $2)
            RETURNING usage_count
            "#,
        )
        .bind(bike_id.to_string())
        .bind(cooled_before)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if claimed.is_none() {
            debug!(bike_id = %bike_id, "Bike no longer claimable");
            return Ok(AssignCommit::BikeUnavailable);
        }

        let inserted = sqlx::query_as::<_, AssignmentRow>(&format!(
            r#"
            INSERT INTO assignments (user_id, bike_id, assigned_at)
            VALUES ($1, $2, $3)
            RETURNING {ASSIGNMENT_COLUMNS}
            "#
        ))
        .bind(actor_id.to_string())
        .bind(bike_id.to_string())
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            // A concurrent assign for the same actor committed between our
            // check and insert; the dropped transaction rolls the claim back.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Ok(if e.constraint() == Some(OPEN_USER_INDEX) {
                    AssignCommit::ActorHolding
                } else {
                    AssignCommit::BikeUnavailable
                });
            }
            Err(e) => return Err(DbError::Query(e).into()),
        };

        let assignment = Assignment::try_from(row)?;
        tx.commit().await.map_err(DbError::Query)?;

        Ok(AssignCommit::Committed(assignment))
    }

    async fn close_assignment(
        &self,
        target: CloseTarget,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Assignment>> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let sql = match target {
            CloseTarget::Held { .. } => format!(
                r#"
                UPDATE assignments
                SET unassigned_at = $3
                WHERE user_id = $1 AND bike_id = $2 AND unassigned_at IS NULL
                RETURNING {ASSIGNMENT_COLUMNS}
                "#
            ),
            CloseTarget::Assignment { .. } => format!(
                r#"
                UPDATE assignments
                SET unassigned_at = $3
                WHERE id = $1 AND user_id = $2 AND unassigned_at IS NULL
                RETURNING {ASSIGNMENT_COLUMNS}
                "#
            ),
        };

        let query = sqlx::query_as::<_, AssignmentRow>(&sql);
        let query = match target {
            CloseTarget::Held { actor_id, bike_id } => query
                .bind(actor_id.to_string())
                .bind(bike_id.to_string()),
            CloseTarget::Assignment {
                assignment_id,
                actor_id,
            } => query
                .bind(assignment_id.value())
                .bind(actor_id.to_string()),
        };

        let row = query
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let assignment = Assignment::try_from(row)?;

        let freed = sqlx::query(
            r#"
            UPDATE bikes
            SET is_assigned = false, last_unassigned = $2
            WHERE id = $1
            "#,
        )
        .bind(assignment.bike_id.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if freed.rows_affected() != 1 {
            warn!(
                assignment_id = %assignment.id,
                bike_id = %assignment.bike_id,
                "Closed assignment references a missing bike"
            );
        }

        tx.commit().await.map_err(DbError::Query)?;

        Ok(Some(assignment))
    }

    async fn insert_actor(&self, actor: &Actor) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, name, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(actor.id.to_string())
        .bind(&actor.name)
        .bind(actor.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_bike(&self, bike_id: &BikeId) -> StoreResult<bool> {
        let result = sqlx::query("INSERT INTO bikes (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(bike_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;

        Ok(result.rows_affected() == 1)
    }
}

struct UserRow {
    id: String,
    name: String,
    role: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            role: row.try_get("role")?,
        })
    }
}

impl TryFrom<UserRow> for Actor {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .parse()
            .map_err(|e| StoreError::corrupt("user", &row.id, e))?;
        let role = Role::parse(&row.role).ok_or_else(|| {
            StoreError::corrupt("user", &row.id, format!("unknown role '{}'", row.role))
        })?;
        Ok(Self {
            id,
            name: row.name,
            role,
        })
    }
}

struct BikeRow {
    id: String,
    is_assigned: bool,
    usage_count: i64,
    last_unassigned: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for BikeRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            is_assigned: row.try_get("is_assigned")?,
            usage_count: row.try_get("usage_count")?,
            last_unassigned: row.try_get("last_unassigned")?,
        })
    }
}

impl TryFrom<BikeRow> for Bike {
    type Error = StoreError;

    fn try_from(row: BikeRow) -> Result<Self, Self::Error> {
        let id = row
            .id
            .parse()
            .map_err(|e| StoreError::corrupt("bike", &row.id, e))?;
        Ok(Self {
            id,
            held: row.is_assigned,
            usage_count: row.usage_count,
            last_released_at: row.last_unassigned,
        })
    }
}

struct AssignmentRow {
    id: i64,
    user_id: String,
    bike_id: String,
    assigned_at: DateTime<Utc>,
    unassigned_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for AssignmentRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            bike_id: row.try_get("bike_id")?,
            assigned_at: row.try_get("assigned_at")?,
            unassigned_at: row.try_get("unassigned_at")?,
        })
    }
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> Result<Self, Self::Error> {
        let actor_id = row
            .user_id
            .parse()
            .map_err(|e| StoreError::corrupt("assignment", row.id.to_string(), e))?;
        let bike_id = row
            .bike_id
            .parse()
            .map_err(|e| StoreError::corrupt("assignment", row.id.to_string(), e))?;
        Ok(Self {
            id: AssignmentId::new(row.id),
            actor_id,
            bike_id,
            assigned_at: row.assigned_at,
            released_at: row.unassigned_at,
        })
    }
}
