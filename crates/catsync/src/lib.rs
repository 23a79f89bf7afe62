pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod script;
pub mod store;

pub use broadcast::{RunProgressBroadcaster, RunProgressEvent};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{CatsyncError, ConfigError, Result, StoreError};
pub use pipeline::{RunCoordinator, StartedRun, SyncPipeline};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use script::{ScriptExec, ScriptRunner};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore};
