//! Route/run consistency: new routes, frequency disagreements and runs that
//! serve more than one school.

use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;

use crate::db::summary_repo::{self, RouteRunDetails, RouteRunSummary, SampleRow};
use crate::db::{master_repo, row_repo, DatabaseError};
use crate::spreadsheet::StudentRouteRow;

use super::{distinct_non_empty, SummaryKind, Validator};

const SAMPLE_ROWS: usize = 3;

pub struct RouteRunValidator;

/// Rows sharing one (route id, run index).
struct RunGroup<'a> {
    route_id: &'a str,
    run_index: &'a str,
    rows: Vec<&'a StudentRouteRow>,
}

fn group_by_run(rows: &[StudentRouteRow]) -> Vec<RunGroup<'_>> {
    let mut groups: BTreeMap<(&str, &str), Vec<&StudentRouteRow>> = BTreeMap::new();
    for row in rows
        .iter()
        .filter(|r| !r.route_id.is_empty() && !r.run_index.is_empty())
    {
        groups
            .entry((row.route_id.as_str(), row.run_index.as_str()))
            .or_default()
            .push(row);
    }
    groups
        .into_iter()
        .map(|((route_id, run_index), rows)| RunGroup {
            route_id,
            run_index,
            rows,
        })
        .collect()
}

/// A group disagrees on frequency if one geocode carries two frequencies in
/// the batch, or carries a frequency that any stored row contradicts.
fn has_inconsistent_frequency(
    conn: &Connection,
    group: &RunGroup<'_>,
) -> Result<bool, DatabaseError> {
    let mut by_geocode: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in group.rows.iter().filter(|r| !r.ugeocode.is_empty()) {
        by_geocode
            .entry(row.ugeocode.as_str())
            .or_default()
            .push(row.run_freq.as_str());
    }

    for (geocode, frequencies) in &by_geocode {
        let distinct = distinct_non_empty(frequencies.iter().copied());
        match distinct.as_slice() {
            [] => {}
            [only] => {
                if row_repo::has_other_frequency(
                    conn,
                    group.route_id,
                    group.run_index,
                    geocode,
                    only,
                )? {
                    return Ok(true);
                }
            }
            _ => return Ok(true),
        }
    }
    Ok(false)
}

fn details(group: &RunGroup<'_>) -> RouteRunDetails {
    RouteRunDetails {
        total_records: group.rows.len(),
        frequencies: distinct_non_empty(group.rows.iter().map(|r| r.run_freq.as_str())),
        school_codes: distinct_non_empty(group.rows.iter().map(|r| r.sch_code.as_str())),
        geocodes: distinct_non_empty(group.rows.iter().map(|r| r.ugeocode.as_str())),
        sample_rows: group
            .rows
            .iter()
            .take(SAMPLE_ROWS)
            .map(|r| SampleRow {
                student_id: r.student_id.clone(),
                run_freq: r.run_freq.clone(),
                sch_code: r.sch_code.clone(),
                ugeocode: r.ugeocode.clone(),
            })
            .collect(),
    }
}

impl Validator for RouteRunValidator {
    fn name(&self) -> &'static str {
        "route_run"
    }

    fn kind(&self) -> SummaryKind {
        SummaryKind::RouteRuns
    }

    fn validate(
        &self,
        conn: &Connection,
        batch_id: &str,
        rows: &[StudentRouteRow],
    ) -> Result<usize, DatabaseError> {
        let groups = group_by_run(rows);
        let mut new_routes: HashMap<&str, bool> = HashMap::new();
        let mut runs_counts: HashMap<&str, i64> = HashMap::new();

        for group in &groups {
            let is_new_route = match new_routes.get(group.route_id) {
                Some(known) => *known,
                None => {
                    let is_new = !master_repo::route_exists(conn, group.route_id)?;
                    new_routes.insert(group.route_id, is_new);
                    is_new
                }
            };
            let runs_count = match runs_counts.get(group.route_id) {
                Some(count) => *count,
                None => {
                    let count = row_repo::runs_count_for_route(conn, batch_id, group.route_id)?;
                    runs_counts.insert(group.route_id, count);
                    count
                }
            };

            let run_details = details(group);
            let first = group.rows[0];
            let summary = RouteRunSummary {
                batch_id: batch_id.to_string(),
                route_id: group.route_id.to_string(),
                run_index: group.run_index.to_string(),
                ugeocode: first.ugeocode.clone(),
                run_freq: first.run_freq.clone(),
                runs_count,
                is_new_route,
                has_inconsistent_frequency: has_inconsistent_frequency(conn, group)?,
                has_stacked_runs: run_details.school_codes.len() > 1,
                validation_details: run_details,
            };
            summary_repo::upsert_route_run(conn, &summary)?;
        }

        log::debug!("Upserted {} route/run summaries for {}", groups.len(), batch_id);
        Ok(groups.len())
    }
}
