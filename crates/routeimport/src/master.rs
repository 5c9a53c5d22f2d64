//! Seeding of master reference data from a spreadsheet.
//!
//! Headers are normalized the same way as import sheets. Expected columns:
//!
//! - schools: `code`, `name`, `active` (optional, defaults to active)
//! - school maps: `legacy_code`, `school_code`
//! - routes: `code`, `description`
//! - students: `code`, `first_name`, `last_name`, `special_needs`
//!   (catalog codes separated by `;`)
//!
//! Lines with a blank key are skipped. A file is loaded in one transaction.

use std::path::Path;

use log::warn;
use tracing::info_span;

use crate::db::{master_repo, Database, DatabaseError};
use crate::error::Result;
use crate::special_needs::SpecialNeed;
use crate::spreadsheet::{RawRecord, ReaderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterKind {
    Schools,
    SchoolMaps,
    Routes,
    Students,
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MasterKind::Schools => "schools",
            MasterKind::SchoolMaps => "school maps",
            MasterKind::Routes => "routes",
            MasterKind::Students => "students",
        })
    }
}

fn text<'a>(record: &'a RawRecord, name: &str) -> &'a str {
    record.get(name).map(str::trim).unwrap_or("")
}

fn is_active(raw: &str) -> bool {
    !matches!(
        raw.to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "n" | "inactive"
    )
}

/// Known catalog codes from a `;`-separated list. Unknown codes are dropped.
fn special_need_codes(raw: &str, student: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .filter(|code| {
            let known = SpecialNeed::from_code(code).is_some();
            if !known {
                warn!("Ignoring unknown special need '{}' for student {}", code, student);
            }
            known
        })
        .map(str::to_string)
        .collect()
}

fn apply(
    conn: &rusqlite::Connection,
    kind: MasterKind,
    record: &RawRecord,
) -> std::result::Result<bool, DatabaseError> {
    match kind {
        MasterKind::Schools => {
            let code = text(record, "code");
            if code.is_empty() {
                return Ok(false);
            }
            let active = is_active(text(record, "active"));
            master_repo::upsert_school(conn, code, text(record, "name"), active)?;
        }
        MasterKind::SchoolMaps => {
            let legacy = text(record, "legacy_code");
            let target = text(record, "school_code");
            if legacy.is_empty() || target.is_empty() {
                return Ok(false);
            }
            master_repo::upsert_school_map(conn, legacy, target)?;
        }
        MasterKind::Routes => {
            let code = text(record, "code");
            if code.is_empty() {
                return Ok(false);
            }
            master_repo::upsert_route(conn, code, text(record, "description"))?;
        }
        MasterKind::Students => {
            let code = text(record, "code");
            if code.is_empty() {
                return Ok(false);
            }
            let (first, last) = (text(record, "first_name"), text(record, "last_name"));
            master_repo::upsert_student(conn, code, first, last)?;
            let needs = special_need_codes(text(record, "special_needs"), code);
            master_repo::set_student_special_needs(conn, code, &needs)?;
        }
    }
    Ok(true)
}

/// Loads one master table from a CSV or XLSX file. Returns the number of
/// records written.
pub fn seed_from_path(db: &Database, kind: MasterKind, path: &Path) -> Result<usize> {
    let _span = info_span!("seed_master", kind = %kind).entered();

    let table = ReaderRegistry::new().read_path(path)?;
    let records: Vec<RawRecord> = table.into_records().collect();

    let written = db.with_transaction(|conn| -> std::result::Result<usize, DatabaseError> {
        let mut written = 0;
        for record in &records {
            if apply(conn, kind, record)? {
                written += 1;
            }
        }
        Ok(written)
    })?;

    log::info!("Loaded {} {} from {}", written, kind, path.display());
    Ok(written)
}
