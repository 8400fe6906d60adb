//! Typed ID definitions for the allocator's entities.

use crate::define_id;

define_id!(
    /// Identifies an actor (a user who may hold a bike).
    ActorId,
    "usr"
);

define_id!(
    /// Identifies one bike in the shared pool.
    BikeId,
    "bike"
);

define_id!(
    /// Correlates an HTTP request with its log lines and error bodies.
    RequestId,
    "req"
);

// =============================================================================
// Assignments
// =============================================================================

/// Assignment ID is a monotonic integer handed out by the store, not
/// ULID-based, so assignment history sorts in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssignmentId(i64);

impl AssignmentId {
    /// Creates a new AssignmentId from an i64.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying i64 value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Parses the decimal form used in URLs.
    pub fn parse(s: &str) -> Result<Self, crate::IdError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(crate::IdError::Empty);
        }
        s.parse::<i64>()
            .map(Self)
            .map_err(|e| crate::IdError::InvalidNumber(e.to_string()))
    }
}

impl std::fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AssignmentId {
    type Err = crate::IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<i64> for AssignmentId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<AssignmentId> for i64 {
    fn from(id: AssignmentId) -> Self {
        id.0
    }
}

impl serde::Serialize for AssignmentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for AssignmentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i64::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

// =============================================================================
// Tests
// =============================================================================
