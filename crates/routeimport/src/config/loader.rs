use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;
use crate::spreadsheet::SpreadsheetFormat;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;

    config.allowed_extensions = config
        .allowed_extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .collect();

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    if config.worker_count == 0 {
        return Err(invalid("worker_count must be greater than 0"));
    }
    if config.progress_flush_interval == 0 {
        return Err(invalid("progress_flush_interval must be greater than 0"));
    }
    if config.max_upload_bytes == 0 {
        return Err(invalid("max_upload_bytes must be greater than 0"));
    }

    if config.allowed_extensions.is_empty() {
        return Err(invalid("allowed_extensions must not be empty"));
    }
    for ext in &config.allowed_extensions {
        if SpreadsheetFormat::from_extension(ext).is_none() {
            return Err(invalid(format!(
                "allowed_extensions contains unsupported format '{}'",
                ext
            )));
        }
    }

    if config.database_path.trim().is_empty() {
        return Err(invalid("database_path must not be empty"));
    }
    if config.storage_directory.trim().is_empty() {
        return Err(invalid("storage_directory must not be empty"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}
