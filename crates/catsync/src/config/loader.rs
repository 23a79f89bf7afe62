//! Configuration loading and validation.

use std::path::Path;

use crate::error::ConfigError;

use super::schema::{Config, ScriptConfig};

/// Reads, parses, and validates a JSON config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&raw)?;
    validate(&config)?;
    Ok(config)
}

/// Validates a configuration regardless of where it came from.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database_path.as_os_str().is_empty() {
        return Err(validation("databasePath must not be empty"));
    }
    if config.store.root.as_os_str().is_empty() {
        return Err(validation("store.root must not be empty"));
    }
    validate_prefix("store.qualityInputPrefix", &config.store.quality_input_prefix)?;
    validate_prefix("store.outputPrefix", &config.store.output_prefix)?;

    validate_script("scripts.extract", &config.scripts.extract)?;
    validate_script("scripts.transform", &config.scripts.transform)?;
    validate_script("scripts.cleanup", &config.scripts.cleanup)?;
    validate_script("scripts.quality", &config.scripts.quality)?;

    if config.server.bind_addr.trim().is_empty() {
        return Err(validation("server.bindAddr must not be empty"));
    }

    Ok(())
}

fn validate_prefix(field: &str, prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(validation(&format!("{} must not be empty", field)));
    }
    if prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(validation(&format!(
            "{} must not start or end with '/'",
            field
        )));
    }
    Ok(())
}

fn validate_script(field: &str, script: &ScriptConfig) -> Result<(), ConfigError> {
    if script.program.as_os_str().is_empty() {
        return Err(validation(&format!("{}.program must not be empty", field)));
    }
    if script.working_dir.as_os_str().is_empty() {
        return Err(validation(&format!(
            "{}.workingDir must not be empty",
            field
        )));
    }
    if script.timeout_secs == 0 {
        return Err(validation(&format!(
            "{}.timeoutSecs must be greater than zero",
            field
        )));
    }
    Ok(())
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
