//! Uploaded-file repository: the `uploaded_files` table.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, DatabaseError};

/// A raw uploaded-file row from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRow {
    pub id: String,
    pub batch_id: String,
    /// 1-based processing order within the batch.
    pub position: i64,
    pub original_name: String,
    /// Blob store handle.
    pub stored_path: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub total_records: i64,
    pub processed_records: i64,
    pub status: String,
    pub error: Option<String>,
    pub uploaded_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            position: row.get("position")?,
            original_name: row.get("original_name")?,
            stored_path: row.get("stored_path")?,
            mime_type: row.get("mime_type")?,
            size_bytes: row.get("size_bytes")?,
            total_records: row.get("total_records")?,
            processed_records: row.get("processed_records")?,
            status: row.get("status")?,
            error: row.get("error")?,
            uploaded_by: row.get("uploaded_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Per-status file counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

pub fn insert(conn: &Connection, file: &FileRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO uploaded_files (id, batch_id, position, original_name, stored_path,
         mime_type, size_bytes, total_records, processed_records, status, error, uploaded_by,
         created_at, updated_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            file.id,
            file.batch_id,
            file.position,
            file.original_name,
            file.stored_path,
            file.mime_type,
            file.size_bytes,
            file.total_records,
            file.processed_records,
            file.status,
            file.error,
            file.uploaded_by,
            file.created_at,
            file.updated_at,
            file.started_at,
            file.completed_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM uploaded_files WHERE id = ?1",
            params![id],
            FileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Files of a batch in processing order.
pub fn list_for_batch(conn: &Connection, batch_id: &str) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM uploaded_files WHERE batch_id = ?1 ORDER BY position")?;
    let rows = stmt
        .query_map(params![batch_id], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Pending files of a batch attached before `position`, in processing order.
pub fn list_pending_before(
    conn: &Connection,
    batch_id: &str,
    position: i64,
) -> Result<Vec<FileRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM uploaded_files
         WHERE batch_id = ?1 AND status = 'pending' AND position < ?2
         ORDER BY position",
    )?;
    let rows = stmt
        .query_map(params![batch_id, position], FileRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Position the next attached file gets.
pub fn next_position(conn: &Connection, batch_id: &str) -> Result<i64, DatabaseError> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM uploaded_files WHERE batch_id = ?1",
        params![batch_id],
        |r| r.get(0),
    )?;
    Ok(next)
}

pub fn status_counts(conn: &Connection, batch_id: &str) -> Result<StatusCounts, DatabaseError> {
    let counts = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
         FROM uploaded_files WHERE batch_id = ?1",
        params![batch_id],
        |r| {
            Ok(StatusCounts {
                total: r.get(0)?,
                completed: r.get(1)?,
                failed: r.get(2)?,
            })
        },
    )?;
    Ok(counts)
}

pub fn mark_processing(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "UPDATE uploaded_files
         SET status = 'processing', error = NULL, started_at = ?2, updated_at = ?2
         WHERE id = ?1",
        params![id, now],
    )?;
    Ok(())
}

pub fn set_total_records(conn: &Connection, id: &str, total: i64) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploaded_files SET total_records = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, total, now_timestamp()],
    )?;
    Ok(())
}

/// Flushes the progress counter. The stored value never decreases and never
/// passes `total_records`.
pub fn set_processed_records(
    conn: &Connection,
    id: &str,
    processed: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE uploaded_files
         SET processed_records = MIN(MAX(processed_records, ?2), total_records), updated_at = ?3
         WHERE id = ?1",
        params![id, processed, now_timestamp()],
    )?;
    Ok(())
}

pub fn mark_completed(conn: &Connection, id: &str, processed: i64) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "UPDATE uploaded_files
         SET status = 'completed', processed_records = MIN(MAX(processed_records, ?2), total_records),
             error = NULL, completed_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![id, processed, now],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<(), DatabaseError> {
    let now = now_timestamp();
    conn.execute(
        "UPDATE uploaded_files
         SET status = 'failed', error = ?2, completed_at = ?3, updated_at = ?3
         WHERE id = ?1",
        params![id, error, now],
    )?;
    Ok(())
}
