//! Shared application state, constructed once at startup and injected
//! into every handler.

use std::sync::Arc;

use catsync::{Database, Reconciler, RunCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub coordinator: Arc<RunCoordinator>,
    pub reconciler: Arc<Reconciler>,
}
