pub mod batch;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod master;
pub mod special_needs;
pub mod spreadsheet;
pub mod storage;
pub mod upload;
pub mod validation;
pub mod worker;

pub use batch::{BatchDetail, BatchManager, BatchStatus, FileStatus, ValidationStatus};
pub use broadcast::{ImportPhase, ImportProgressBroadcaster, ImportProgressEvent};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    BatchError, ConfigError, ImportError, Result, SpreadsheetError, StorageError, UploadError,
    WorkerError,
};
pub use ingest::{IngestOutcome, IngestionJob, ProgressReporter};
pub use master::{seed_from_path, MasterKind};
pub use special_needs::{SpecialNeed, SpecialNeedFlags};
pub use spreadsheet::{ReaderRegistry, SpreadsheetFormat, StudentRouteRow};
pub use storage::{BlobStore, FileSystemBlobStore};
pub use upload::{UploadFile, UploadPolicy, Uploader};
pub use validation::{ValidationError, ValidationReport, ValidationSuite, Validator};
pub use worker::{BatchChain, ChainQueue, ChainResult, ChainRunner, WorkerPool};
