//! Schema migrations.
//!
//! Applied versions are recorded in `_migrations`; each pending SQL file
//! runs once, in version order, together with its bookkeeping row.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_batches_and_files",
        sql: include_str!("sql/001_create_batches_and_files.sql"),
    },
    Migration {
        version: 2,
        description: "create_student_route_rows",
        sql: include_str!("sql/002_create_student_route_rows.sql"),
    },
    Migration {
        version: 3,
        description: "create_validation_summaries",
        sql: include_str!("sql/003_create_validation_summaries.sql"),
    },
    Migration {
        version: 4,
        description: "create_master_tables",
        sql: include_str!("sql/004_create_master_tables.sql"),
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current_version) {
        log::info!(
            "Applying schema v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
