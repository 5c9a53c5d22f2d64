//! Ingestion of uploaded spreadsheets into the raw row store.

pub mod job;
pub mod progress;

pub use job::{IngestOutcome, IngestionJob, DEFAULT_FLUSH_INTERVAL};
pub use progress::{BroadcastProgress, FileProgress, NoopProgress, ProgressReporter, RecordingProgress};
