//! Upload entrypoint: checks a submission, stores it and queues its chain.

pub mod policy;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, info_span, warn};

use crate::batch::{self, BatchStatus, FileStatus};
use crate::db::file_repo::{self, FileRow};
use crate::db::{batch_repo, now_timestamp, Database, DatabaseError};
use crate::error::{Result, UploadError};
use crate::storage::BlobStore;
use crate::worker::{BatchChain, ChainQueue};

pub use policy::{mime_type_for, UploadPolicy};

/// One submitted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> std::result::Result<Self, UploadError> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| UploadError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self { name, content })
    }
}

pub struct Uploader {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn ChainQueue>,
    policy: UploadPolicy,
}

impl Uploader {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn ChainQueue>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            db,
            blobs,
            queue,
            policy,
        }
    }

    /// Attaches `files` to a batch and queues their ingestion.
    ///
    /// Every file is checked first; one bad file rejects the submission
    /// before anything is stored. Returns the new file rows, still pending.
    pub fn upload(
        &self,
        batch_id: &str,
        files: &[UploadFile],
        uploaded_by: Option<&str>,
    ) -> Result<Vec<FileRow>> {
        let _span = info_span!("upload", batch_id = %batch_id, files = files.len()).entered();

        if files.is_empty() {
            return Err(UploadError::NoFiles.into());
        }
        for file in files {
            self.policy.check(&file.name, file.content.len() as u64)?;
        }
        if self
            .db
            .with_conn(|conn| batch_repo::find_by_id(conn, batch_id))?
            .is_none()
        {
            return Err(UploadError::BatchNotFound(batch_id.to_string()).into());
        }

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            stored.push(self.blobs.put(&file.name, &file.content)?);
        }

        let rows = self.db.with_transaction(|conn| -> Result<Vec<FileRow>> {
            let first_position = file_repo::next_position(conn, batch_id)?;
            let now = now_timestamp();
            let mut rows = Vec::with_capacity(files.len());
            for (offset, (file, stored_path)) in files.iter().zip(&stored).enumerate() {
                let row = FileRow {
                    id: uuid::Uuid::new_v4().to_string(),
                    batch_id: batch_id.to_string(),
                    position: first_position + offset as i64,
                    original_name: file.name.clone(),
                    stored_path: stored_path.clone(),
                    mime_type: mime_type_for(&file.name),
                    size_bytes: file.content.len() as i64,
                    total_records: 0,
                    processed_records: 0,
                    status: FileStatus::Pending.as_str().to_string(),
                    error: None,
                    uploaded_by: uploaded_by.map(str::to_string),
                    created_at: now.clone(),
                    updated_at: now.clone(),
                    started_at: None,
                    completed_at: None,
                };
                file_repo::insert(conn, &row)?;
                rows.push(row);
            }
            // Before any row is parsed.
            batch_repo::set_status(conn, batch_id, BatchStatus::Processing.as_str(), uploaded_by)?;
            Ok(rows)
        })?;

        let chain = BatchChain::new(batch_id, rows.iter().map(|r| r.id.clone()).collect());
        if let Err(e) = self.queue.enqueue(chain) {
            warn!("Could not queue batch {}: {}", batch_id, e);
            self.fail_unqueued(batch_id, &rows, &e.to_string())?;
            return Err(e.into());
        }

        info!("Queued {} file(s) for batch {}", rows.len(), batch_id);
        Ok(rows)
    }

    fn fail_unqueued(&self, batch_id: &str, rows: &[FileRow], message: &str) -> Result<()> {
        self.db
            .with_transaction(|conn| -> std::result::Result<(), DatabaseError> {
                for row in rows {
                    file_repo::mark_failed(conn, &row.id, message)?;
                }
                batch::mark_failed_in(conn, batch_id)
            })?;
        Ok(())
    }
}
