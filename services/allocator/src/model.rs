//! Domain records shared by the store, the engine and the HTTP layer.

use bikepool_id::{ActorId, AssignmentId, BikeId};
use chrono::{DateTime, Duration, Utc};

/// What an actor is allowed to do with the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// May hold one bike at a time.
    Customer,
    /// Operates the pool; never holds a bike.
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "Customer",
            Self::Admin => "Admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Customer" => Some(Self::Customer),
            "Admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn can_hold(&self) -> bool {
        matches!(self, Self::Customer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub role: Role,
}

/// One bike and its allocation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bike {
    pub id: BikeId,
    /// True while exactly one open assignment references this bike.
    pub held: bool,
    /// Number of successful assignments so far.
    pub usage_count: i64,
    pub last_released_at: Option<DateTime<Utc>>,
}

impl Bike {
    /// A bike that has never been assigned.
    pub fn new(id: BikeId) -> Self {
        Self {
            id,
            held: false,
            usage_count: 0,
            last_released_at: None,
        }
    }

    /// Unheld and rested for at least `cooldown` since its last release.
    pub fn is_available(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        !self.held
            && self
                .last_released_at
                .is_none_or(|released_at| now - released_at >= cooldown)
    }
}

/// One actor holding one bike for an interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub actor_id: ActorId,
    pub bike_id: BikeId,
    pub assigned_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn is_open(&self) -> bool {
        self.released_at.is_none()
    }
}
