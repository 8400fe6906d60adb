//! Application state shared across request handlers.

use std::sync::Arc;

use crate::engine::AllocationEngine;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: AllocationEngine,
}

impl AppState {
    pub fn new(engine: AllocationEngine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { engine }),
        }
    }

    pub fn engine(&self) -> &AllocationEngine {
        &self.inner.engine
    }
}
