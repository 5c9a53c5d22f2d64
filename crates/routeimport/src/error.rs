use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Upload rejected: {0}")]
    Upload(#[from] UploadError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Validation error: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
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

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read spreadsheet '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Spreadsheet has no header row")]
    MissingHeader,

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read XLSX: {0}")]
    Xlsx(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open blob '{path}': {source}")]
    OpenBlob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blob name: {0}")]
    InvalidName(String),

    #[error("Could not find a free name for '{0}'")]
    NameExhausted(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Chain for batch {0} has no files")]
    EmptyChain(String),

    #[error("Uploaded file not found: {0}")]
    UnknownFile(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No files were submitted")]
    NoFiles,

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("'{name}' is not a recognized spreadsheet type (allowed: {allowed})")]
    UnsupportedType { name: String, allowed: String },

    #[error("'{name}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("'{0}' is empty")]
    Empty(String),

    #[error("Failed to read upload '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch not found: {0}")]
    NotFound(String),

    #[error("Batch {id} still owns {files} file(s) and cannot be deleted")]
    NotEmpty { id: String, files: i64 },

    #[error("Batch name must not be empty")]
    EmptyName,
}

pub type Result<T> = std::result::Result<T, ImportError>;
