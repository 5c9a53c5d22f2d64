//! Upload batch lifecycle: creation, lookup, deletion and status
//! recomputation from member files.

pub mod status;

use rusqlite::Connection;
use serde::Serialize;

use crate::db::batch_repo::{self, BatchRow};
use crate::db::file_repo::{self, FileRow};
use crate::db::{now_timestamp, Database, DatabaseError};
use crate::error::{BatchError, Result};

pub use status::{aggregate_status, BatchStatus, FileStatus, ValidationStatus};

/// A batch together with its files in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub batch: BatchRow,
    pub files: Vec<FileRow>,
}

/// Recomputes a batch's status from its files and stores it.
///
/// Must run inside a transaction so concurrent completions see each other's
/// writes. A batch that already failed stays failed.
pub fn recompute_status_in(conn: &Connection, batch_id: &str) -> Result<BatchStatus> {
    let batch = batch_repo::find_by_id(conn, batch_id)?
        .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))?;
    let current = BatchStatus::parse(&batch.status)?;
    if current == BatchStatus::Failed {
        return Ok(current);
    }

    let next = aggregate_status(file_repo::status_counts(conn, batch_id)?);
    if next != current {
        batch_repo::set_status(conn, batch_id, next.as_str(), None)?;
        log::debug!("Batch {} status {} -> {}", batch_id, current, next);
    }
    Ok(next)
}

/// Fails a batch directly, without waiting for the aggregate.
pub fn mark_failed_in(conn: &Connection, batch_id: &str) -> std::result::Result<(), DatabaseError> {
    batch_repo::set_status(conn, batch_id, BatchStatus::Failed.as_str(), None)?;
    Ok(())
}

/// Batch management service over the shared database handle.
#[derive(Clone)]
pub struct BatchManager {
    db: Database,
}

impl BatchManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_batch(&self, name: &str, created_by: Option<&str>) -> Result<BatchRow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BatchError::EmptyName.into());
        }

        let now = now_timestamp();
        let batch = BatchRow {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: BatchStatus::WaitingForUpload.as_str().to_string(),
            validation_status: ValidationStatus::NotRun.as_str().to_string(),
            validation_error: None,
            validated_at: None,
            created_by: created_by.map(str::to_string),
            updated_by: created_by.map(str::to_string),
            created_at: now.clone(),
            updated_at: now,
        };
        self.db.with_conn(|conn| batch_repo::insert(conn, &batch))?;

        log::info!("Created batch {} ({})", batch.id, batch.name);
        Ok(batch)
    }

    pub fn find_batch(&self, id: &str) -> Result<Option<BatchRow>> {
        Ok(self.db.with_conn(|conn| batch_repo::find_by_id(conn, id))?)
    }

    pub fn list_batches(&self) -> Result<Vec<BatchRow>> {
        Ok(batch_repo::list(&self.db)?)
    }

    pub fn batch_detail(&self, id: &str) -> Result<BatchDetail> {
        self.db.with_conn(|conn| {
            let Some(batch) = batch_repo::find_by_id(conn, id)? else {
                return Ok(None);
            };
            let files = file_repo::list_for_batch(conn, id)?;
            Ok(Some(BatchDetail { batch, files }))
        })?
        .ok_or_else(|| BatchError::NotFound(id.to_string()).into())
    }

    /// Deletes a batch. Only batches that own no files can be deleted.
    pub fn delete_batch(&self, id: &str) -> Result<()> {
        self.db.with_transaction(|conn| -> Result<()> {
            if batch_repo::find_by_id(conn, id)?.is_none() {
                return Err(BatchError::NotFound(id.to_string()).into());
            }
            let files = file_repo::status_counts(conn, id)?.total;
            if files > 0 {
                return Err(BatchError::NotEmpty {
                    id: id.to_string(),
                    files,
                }
                .into());
            }
            batch_repo::delete(conn, id)?;
            Ok(())
        })?;

        log::info!("Deleted batch {}", id);
        Ok(())
    }

    pub fn recompute_status(&self, id: &str) -> Result<BatchStatus> {
        self.db
            .with_transaction(|conn| -> Result<BatchStatus> { recompute_status_in(conn, id) })
    }
}
