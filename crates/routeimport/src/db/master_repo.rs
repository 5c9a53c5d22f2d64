//! Master reference data: schools, legacy school maps, routes, students and
//! their special-need associations.
//!
//! The validators only read these tables. The upsert helpers feed the
//! `master` CLI command and test fixtures.

use rusqlite::{params, Connection, OptionalExtension};

use super::DatabaseError;

pub fn school_exists(conn: &Connection, code: &str) -> Result<bool, DatabaseError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM schools WHERE code = ?1)",
        params![code],
        |r| r.get(0),
    )?;
    Ok(found)
}

/// Resolves a legacy code to its current school code. Returns `None` when
/// there is no mapping or when the mapped school does not exist.
pub fn legacy_school_target(
    conn: &Connection,
    legacy_code: &str,
) -> Result<Option<String>, DatabaseError> {
    let target = conn
        .query_row(
            "SELECT s.code FROM school_maps m
             JOIN schools s ON s.code = m.school_code
             WHERE m.legacy_code = ?1",
            params![legacy_code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(target)
}

pub fn route_exists(conn: &Connection, code: &str) -> Result<bool, DatabaseError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM routes WHERE code = ?1)",
        params![code],
        |r| r.get(0),
    )?;
    Ok(found)
}

/// Special-need codes currently on file for a student, or `None` when the
/// student is not in the master table.
pub fn student_special_needs(
    conn: &Connection,
    student_code: &str,
) -> Result<Option<Vec<String>>, DatabaseError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM students WHERE code = ?1)",
        params![student_code],
        |r| r.get(0),
    )?;
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT special_need_code FROM student_special_needs
         WHERE student_code = ?1 ORDER BY special_need_code",
    )?;
    let codes = stmt
        .query_map(params![student_code], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(Some(codes))
}

pub fn upsert_school(
    conn: &Connection,
    code: &str,
    name: &str,
    active: bool,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO schools (code, name, active) VALUES (?1, ?2, ?3)
         ON CONFLICT(code) DO UPDATE SET name = excluded.name, active = excluded.active",
        params![code, name, active],
    )?;
    Ok(())
}

pub fn upsert_school_map(
    conn: &Connection,
    legacy_code: &str,
    school_code: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO school_maps (legacy_code, school_code) VALUES (?1, ?2)
         ON CONFLICT(legacy_code) DO UPDATE SET school_code = excluded.school_code",
        params![legacy_code, school_code],
    )?;
    Ok(())
}

pub fn upsert_route(conn: &Connection, code: &str, description: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO routes (code, description) VALUES (?1, ?2)
         ON CONFLICT(code) DO UPDATE SET description = excluded.description",
        params![code, description],
    )?;
    Ok(())
}

pub fn upsert_student(
    conn: &Connection,
    code: &str,
    first_name: &str,
    last_name: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO students (code, first_name, last_name) VALUES (?1, ?2, ?3)
         ON CONFLICT(code) DO UPDATE SET first_name = excluded.first_name,
                                         last_name = excluded.last_name",
        params![code, first_name, last_name],
    )?;
    Ok(())
}

/// Replaces a student's special-need associations.
pub fn set_student_special_needs(
    conn: &Connection,
    student_code: &str,
    codes: &[String],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM student_special_needs WHERE student_code = ?1",
        params![student_code],
    )?;
    for code in codes {
        conn.execute(
            "INSERT OR IGNORE INTO student_special_needs (student_code, special_need_code)
             VALUES (?1, ?2)",
            params![student_code, code],
        )?;
    }
    Ok(())
}

/// Number of entries in the special-need catalog.
pub fn special_need_count(conn: &Connection) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM special_needs", [], |r| r.get(0))?;
    Ok(count)
}
