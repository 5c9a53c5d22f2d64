//! Trip-assignment school codes resolved against master schools.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::db::summary_repo::{self, SchoolSummary};
use crate::db::{master_repo, DatabaseError};
use crate::spreadsheet::StudentRouteRow;

use super::{SummaryKind, Validator};

pub struct SchoolValidator;

/// A code is known when it names a master school directly, or through a
/// legacy mapping whose target school exists.
fn is_known_school(conn: &Connection, code: &str) -> Result<bool, DatabaseError> {
    if master_repo::school_exists(conn, code)? {
        return Ok(true);
    }
    Ok(master_repo::legacy_school_target(conn, code)?.is_some())
}

impl Validator for SchoolValidator {
    fn name(&self) -> &'static str {
        "school"
    }

    fn kind(&self) -> SummaryKind {
        SummaryKind::Schools
    }

    fn validate(
        &self,
        conn: &Connection,
        batch_id: &str,
        rows: &[StudentRouteRow],
    ) -> Result<usize, DatabaseError> {
        let mut groups: BTreeMap<&str, Vec<&StudentRouteRow>> = BTreeMap::new();
        for row in rows.iter().filter(|r| !r.sch_code.is_empty()) {
            groups.entry(row.sch_code.as_str()).or_default().push(row);
        }

        for (code, group) in &groups {
            let summary = SchoolSummary {
                batch_id: batch_id.to_string(),
                sch_code: code.to_string(),
                // What the import said, not the master name.
                sch_name: group[0].sch_name.clone(),
                is_unknown_school: !is_known_school(conn, code)?,
                record_count: group.len() as i64,
            };
            summary_repo::upsert_school(conn, &summary)?;
        }

        log::debug!("Upserted {} school summaries for {}", groups.len(), batch_id);
        Ok(groups.len())
    }
}
