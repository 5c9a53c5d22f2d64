//! Special-need agreement within a batch and against master students.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::db::summary_repo::{self, SpecialNeedInconsistency, SpecialNeedsData, StudentSummary};
use crate::db::{master_repo, DatabaseError};
use crate::special_needs::SpecialNeed;
use crate::spreadsheet::StudentRouteRow;

use super::{SummaryKind, Validator};

pub struct StudentValidator;

/// First disagreement with the baseline row, per special-need column.
///
/// Offsets count the baseline as 1, so the second row of the group is 2.
fn inconsistencies(group: &[&StudentRouteRow]) -> Vec<SpecialNeedInconsistency> {
    let Some(first) = group.first() else {
        return Vec::new();
    };

    SpecialNeed::ALL
        .into_iter()
        .filter_map(|need| {
            let baseline = first.special_needs.get(need);
            group
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, row)| row.special_needs.get(need) != baseline)
                .map(|(i, row)| SpecialNeedInconsistency {
                    column: need.column().to_string(),
                    first_value: baseline,
                    row_offset: i + 1,
                    conflicting_value: row.special_needs.get(need),
                })
        })
        .collect()
}

fn sorted(mut codes: Vec<String>) -> Vec<String> {
    codes.sort();
    codes
}

impl Validator for StudentValidator {
    fn name(&self) -> &'static str {
        "student"
    }

    fn kind(&self) -> SummaryKind {
        SummaryKind::Students
    }

    fn validate(
        &self,
        conn: &Connection,
        batch_id: &str,
        rows: &[StudentRouteRow],
    ) -> Result<usize, DatabaseError> {
        // Blank ids form a group of their own.
        let mut groups: BTreeMap<&str, Vec<&StudentRouteRow>> = BTreeMap::new();
        for row in rows {
            groups.entry(row.student_id.as_str()).or_default().push(row);
        }

        for (student_id, group) in &groups {
            let new_codes = group[0].special_needs.codes();
            let conflicts = inconsistencies(group);

            let (is_new_student, current, changed) =
                match master_repo::student_special_needs(conn, student_id)? {
                    None => (true, Vec::new(), false),
                    Some(current) => {
                        let changed = sorted(current.clone()) != sorted(new_codes.clone());
                        (false, current, changed)
                    }
                };

            let summary = StudentSummary {
                batch_id: batch_id.to_string(),
                student_id: student_id.to_string(),
                is_new_student,
                has_inconsistent_special_needs: !conflicts.is_empty(),
                has_special_needs_changes: changed,
                special_needs_data: SpecialNeedsData {
                    current,
                    new: new_codes,
                },
                inconsistencies_data: conflicts,
            };
            summary_repo::upsert_student(conn, &summary)?;
        }

        log::debug!("Upserted {} student summaries for {}", groups.len(), batch_id);
        Ok(groups.len())
    }
}
