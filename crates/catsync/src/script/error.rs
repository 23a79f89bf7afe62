//! Script execution error types.
//!
//! A script that runs and exits nonzero is not an error at this layer —
//! that outcome is part of [`ScriptOutput`](super::ScriptOutput). These
//! errors cover the cases where no meaningful exit status exists.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    /// The process could not be started at all (missing executable,
    /// permission denied, bad working directory).
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the spawned process failed.
    #[error("Failed waiting on '{program}': {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for script execution.
pub type Result<T> = std::result::Result<T, ScriptError>;
