//! Batch repository: CRUD for the `upload_batches` table.
//!
//! Writes take a `&Connection` so they compose inside
//! `Database::with_transaction`.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{now_timestamp, Database, DatabaseError};

/// A raw batch row from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub validation_status: String,
    pub validation_error: Option<String>,
    pub validated_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            status: row.get("status")?,
            validation_status: row.get("validation_status")?,
            validation_error: row.get("validation_error")?,
            validated_at: row.get("validated_at")?,
            created_by: row.get("created_by")?,
            updated_by: row.get("updated_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(conn: &Connection, batch: &BatchRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO upload_batches (id, name, status, validation_status, validation_error,
         validated_at, created_by, updated_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            batch.id,
            batch.name,
            batch.status,
            batch.validation_status,
            batch.validation_error,
            batch.validated_at,
            batch.created_by,
            batch.updated_by,
            batch.created_at,
            batch.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM upload_batches WHERE id = ?1",
            params![id],
            BatchRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all batches, newest first.
pub fn list(db: &Database) -> Result<Vec<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM upload_batches ORDER BY created_at DESC, id")?;
        let rows = stmt
            .query_map([], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sets the lifecycle status. Returns the number of rows touched.
pub fn set_status(
    conn: &Connection,
    id: &str,
    status: &str,
    updated_by: Option<&str>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE upload_batches
         SET status = ?2, updated_by = COALESCE(?3, updated_by), updated_at = ?4
         WHERE id = ?1",
        params![id, status, updated_by, now_timestamp()],
    )?;
    Ok(changed)
}

/// Records the outcome of a validation run.
pub fn set_validation(
    conn: &Connection,
    id: &str,
    validation_status: &str,
    validation_error: Option<&str>,
    validated_at: Option<&str>,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE upload_batches
         SET validation_status = ?2, validation_error = ?3,
             validated_at = COALESCE(?4, validated_at), updated_at = ?5
         WHERE id = ?1",
        params![
            id,
            validation_status,
            validation_error,
            validated_at,
            now_timestamp()
        ],
    )?;
    Ok(changed)
}

pub fn delete(conn: &Connection, id: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute("DELETE FROM upload_batches WHERE id = ?1", params![id])?;
    Ok(changed)
}
