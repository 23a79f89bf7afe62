//! Run orchestration: the sequential extract → transform → quality
//! state machine and the coordinator that accepts runs.

pub mod context;
pub mod coordinator;
pub mod error;
pub mod progress;
pub mod runner;

pub use context::{CategoryOutcome, RunContext, RunReport, RunStep};
pub use coordinator::{RunCoordinator, StartedRun};
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::SyncPipeline;
