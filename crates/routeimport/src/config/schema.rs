use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ingest::DEFAULT_FLUSH_INTERVAL;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_storage_directory")]
    pub storage_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Rows ingested between durable progress updates.
    #[serde(default = "default_flush_interval")]
    pub progress_flush_interval: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Lowercase extensions accepted at upload.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database_path: default_database_path(),
            storage_directory: default_storage_directory(),
            worker_count: default_worker_count(),
            progress_flush_interval: default_flush_interval(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn storage_directory(&self) -> PathBuf {
        PathBuf::from(&self.storage_directory)
    }
}

/// `~/.routeimport`, or a relative `.routeimport` when there is no home.
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".routeimport"))
        .unwrap_or_else(|| PathBuf::from(".routeimport"))
}

fn default_database_path() -> String {
    default_home()
        .join("routeimport.db")
        .to_string_lossy()
        .to_string()
}

fn default_storage_directory() -> String {
    default_home().join("uploads").to_string_lossy().to_string()
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_flush_interval() -> usize {
    DEFAULT_FLUSH_INTERVAL
}

fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["csv".to_string(), "xlsx".to_string()]
}
