//! Service configuration: JSON file loading, schema, validation.

pub mod loader;
pub mod schema;

pub use loader::{load_config, validate};
pub use schema::{Config, ReconcileConfig, ScriptConfig, ScriptsConfig, ServerConfig, StoreConfig};
