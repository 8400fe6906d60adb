//! # bikepool-id
//!
//! Typed identifiers for the bikepool allocator.
//!
//! ## ID Format
//!
//! Actors, bikes and requests use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `usr_01JAFW5Q8R3T9V2X4Y6Z7A1B0C`
//! - `bike_01JAFW6M2N4P8S3T5V7W9X1Y0Z`
//!
//! The ULID's canonical encoding sorts the same way as its numeric value, so
//! ordering ids and ordering their string forms agree. The store relies on
//! this for the deterministic least-used tie-break.
//!
//! Assignments are numbered by the store instead (see [`AssignmentId`]).

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
