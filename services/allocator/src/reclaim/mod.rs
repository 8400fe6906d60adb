//! Periodic reclaim of overdue bikes.
//!
//! The reclaim worker runs the engine's overdue sweep on a fixed interval,
//! independent of request traffic. Sweeps never overlap: the next tick is
//! only awaited once the current sweep has finished.

mod worker;

pub use worker::{ReclaimHandle, ReclaimWorker, ReclaimWorkerConfig};
