//! Development fixtures.
//!
//! Inserted on startup in dev mode so a fresh database has a few users and
//! bikes to play with. Ids are fixed, and existing rows are left untouched,
//! so seeding any number of times yields the same pool.

use bikepool_id::{ActorId, BikeId, Ulid};
use tracing::{debug, info};

use crate::model::{Actor, Role};
use crate::store::{AllocationStore, StoreResult};

pub const ALICE: ActorId = ActorId::from_ulid(Ulid(0x0190_5e3a_7c00_0000_0000_0000_0000_0a11));
pub const BOB: ActorId = ActorId::from_ulid(Ulid(0x0190_5e3a_7c00_0000_0000_0000_0000_0b0b));
pub const CHARLIE: ActorId = ActorId::from_ulid(Ulid(0x0190_5e3a_7c00_0000_0000_0000_0000_0c4a));

pub const BIKES: [BikeId; 2] = [
    BikeId::from_ulid(Ulid(0x0190_5e3a_7d00_0000_0000_0000_0000_0001)),
    BikeId::from_ulid(Ulid(0x0190_5e3a_7d00_0000_0000_0000_0000_0002)),
];

/// Rows created by one [`seed_fixtures`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub actors_created: usize,
    pub bikes_created: usize,
}

pub fn fixture_actors() -> [Actor; 3] {
    [
        Actor {
            id: ALICE,
            name: "Alice".to_string(),
            role: Role::Customer,
        },
        Actor {
            id: BOB,
            name: "Bob".to_string(),
            role: Role::Customer,
        },
        Actor {
            id: CHARLIE,
            name: "Charlie".to_string(),
            role: Role::Admin,
        },
    ]
}

pub async fn seed_fixtures(store: &dyn AllocationStore) -> StoreResult<SeedReport> {
    let mut report = SeedReport::default();

    for actor in fixture_actors() {
        if store.insert_actor(&actor).await? {
            debug!(actor_id = %actor.id, name = %actor.name, role = %actor.role, "Seeded user");
            report.actors_created += 1;
        }
    }

    for bike_id in BIKES {
        if store.insert_bike(&bike_id).await? {
            debug!(bike_id = %bike_id, "Seeded bike");
            report.bikes_created += 1;
        }
    }

    info!(
        actors_created = report.actors_created,
        bikes_created = report.bikes_created,
        "Database seeded"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAllocationStore;

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryAllocationStore::new();

        let first = seed_fixtures(&store).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                actors_created: 3,
                bikes_created: 2
            }
        );

        let second = seed_fixtures(&store).await.unwrap();
        assert_eq!(second, SeedReport::default());
        assert_eq!(store.list_bikes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fixture_roles() {
        let store = MemoryAllocationStore::new();
        seed_fixtures(&store).await.unwrap();

        let charlie = store.find_actor(&CHARLIE).await.unwrap().unwrap();
        assert_eq!(charlie.role, Role::Admin);
        let alice = store.find_actor(&ALICE).await.unwrap().unwrap();
        assert_eq!(alice.role, Role::Customer);
    }

    #[test]
    fn test_fixture_ids_roundtrip_through_strings() {
        let parsed: ActorId = ALICE.to_string().parse().unwrap();
        assert_eq!(parsed, ALICE);
        assert!(BIKES[0] < BIKES[1]);
    }
}
