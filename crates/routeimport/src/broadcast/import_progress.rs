//! Import progress broadcaster for real-time batch status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of a file (or batch) in the import chain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Queued,
    Parsing,
    Ingesting,
    Validating,
    Completed,
    Failed,
}

impl std::fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportPhase::Queued => write!(f, "Queued"),
            ImportPhase::Parsing => write!(f, "Parsing"),
            ImportPhase::Ingesting => write!(f, "Ingesting rows"),
            ImportPhase::Validating => write!(f, "Validating"),
            ImportPhase::Completed => write!(f, "Completed"),
            ImportPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for one file of a batch, or for the batch itself during
/// validation (no file fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgressEvent {
    pub batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// 1-based position of the file in its chain ("file N of M").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    pub phase: ImportPhase,
    pub processed_records: i64,
    pub total_records: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportProgressEvent {
    /// Creates a batch-level event.
    pub fn new(batch_id: &str, phase: ImportPhase, message: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            file_id: None,
            file_name: None,
            file_position: None,
            file_count: None,
            phase,
            processed_records: 0,
            total_records: 0,
            message: message.to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_file(mut self, file: &FileContext) -> Self {
        self.file_id = Some(file.file_id.clone());
        self.file_name = Some(file.file_name.clone());
        self.file_position = Some(file.position);
        self.file_count = Some(file.count);
        self
    }

    pub fn with_records(mut self, processed: i64, total: i64) -> Self {
        self.processed_records = processed;
        self.total_records = total;
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Identifies a file within its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    pub batch_id: String,
    pub file_id: String,
    pub file_name: String,
    pub position: usize,
    pub count: usize,
}

impl FileContext {
    /// "file 2 of 3"
    pub fn label(&self) -> String {
        format!("file {} of {}", self.position, self.count)
    }
}

/// Broadcasts import progress events for streaming.
#[derive(Clone)]
pub struct ImportProgressBroadcaster {
    sender: Arc<broadcast::Sender<ImportProgressEvent>>,
}

impl ImportProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: ImportProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportProgressEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> Arc<broadcast::Sender<ImportProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for ImportProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
