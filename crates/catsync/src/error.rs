use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatsyncError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] crate::reconcile::ReconcileError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors from the blob store.
///
/// "Object is absent" and "store is unreachable" are deliberately
/// distinct: the reconciler treats the first as a normal answer and the
/// second as a retryable fault.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if the error is likely transient and the operation
    /// can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, CatsyncError>;
