//! Service configuration schema.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::script::ScriptSpec;

/// Top-level service configuration, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    pub store: StoreConfig,
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Blob store layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Root directory of the object store.
    pub root: PathBuf,
    /// Prefix holding per-category quality-check inputs
    /// (`{prefix}/{client}/{category}.jsonl`).
    #[serde(default = "default_input_prefix")]
    pub quality_input_prefix: String,
    /// Prefix the pipeline writes its outputs under; the reconciler
    /// watches `{prefix}/{client}/` for new objects.
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
}

impl StoreConfig {
    /// Input object key for one category of a tenant.
    pub fn quality_input_key(&self, client_name: &str, category: &str) -> String {
        format!(
            "{}/{}/{}.jsonl",
            self.quality_input_prefix, client_name, category
        )
    }

    /// Output object key for one category of a tenant.
    pub fn quality_output_key(&self, client_name: &str, category: &str) -> String {
        format!("{}/{}/{}.jsonl", self.output_prefix, client_name, category)
    }

    /// Prefix under which a tenant's pipeline outputs appear.
    pub fn client_output_prefix(&self, client_name: &str) -> String {
        format!("{}/{}/", self.output_prefix, client_name)
    }
}

fn default_input_prefix() -> String {
    "quality-input".to_string()
}

fn default_output_prefix() -> String {
    "pipeline-output".to_string()
}

/// The four external scripts the orchestrator drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptsConfig {
    /// Step A: bulk extraction.
    pub extract: ScriptConfig,
    /// Step B: transform/load.
    pub transform: ScriptConfig,
    /// Compensating cleanup when transform fails.
    pub cleanup: ScriptConfig,
    /// Per-category quality generation.
    pub quality: ScriptConfig,
}

/// One external script: program, fixed leading arguments, working
/// directory, timeout, and extra environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ScriptConfig {
    /// Base invocation spec; per-run arguments are appended by the caller.
    pub fn spec(&self) -> ScriptSpec {
        let mut spec = ScriptSpec::new(
            &self.program,
            &self.working_dir,
            Duration::from_secs(self.timeout_secs),
        )
        .args(self.args.iter().cloned());
        for (key, value) in &self.env {
            spec = spec.env(key.clone(), value.clone());
        }
        spec
    }
}

fn default_timeout_secs() -> u64 {
    3600
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Reconciler retry knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}
