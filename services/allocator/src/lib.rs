//! bikepool allocator library.
//!
//! This crate primarily ships an `allocator` binary, but we expose the
//! engine, stores and router as a library for integration testing and
//! embedding.

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod model;
pub mod reclaim;
pub mod seed;
pub mod state;
pub mod store;
