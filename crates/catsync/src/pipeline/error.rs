use thiserror::Error;

/// Errors surfaced when accepting a run. Failures inside a running
/// pipeline are not errors at this level — the background task records
/// them in the sync state and pipeline status stores, where the polling
/// client observes them.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("A run is already in flight for client '{0}'")]
    AlreadyRunning(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}
