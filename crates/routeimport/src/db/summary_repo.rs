//! Validation summaries: upserts keyed per batch, plus the paged read-only
//! listings over the summaries and the raw rows.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::row_repo::StoredRow;
use super::{now_timestamp, Database, DatabaseError};

/// Diagnostic payload stored with a route/run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRunDetails {
    pub total_records: usize,
    pub frequencies: Vec<String>,
    pub school_codes: Vec<String>,
    pub geocodes: Vec<String>,
    pub sample_rows: Vec<SampleRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRow {
    pub student_id: String,
    pub run_freq: String,
    pub sch_code: String,
    pub ugeocode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRunSummary {
    pub batch_id: String,
    pub route_id: String,
    pub run_index: String,
    pub ugeocode: String,
    pub run_freq: String,
    pub runs_count: i64,
    pub is_new_route: bool,
    pub has_inconsistent_frequency: bool,
    pub has_stacked_runs: bool,
    pub validation_details: RouteRunDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolSummary {
    pub batch_id: String,
    pub sch_code: String,
    pub sch_name: String,
    pub is_unknown_school: bool,
    pub record_count: i64,
}

/// Current (master) and new (imported) special-need codes of a student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialNeedsData {
    pub current: Vec<String>,
    pub new: Vec<String>,
}

/// First disagreement on one flag among a student's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialNeedInconsistency {
    pub column: String,
    pub first_value: bool,
    /// Offset of the conflicting row within the student's rows; the
    /// baseline row is 1, so the first possible conflict is at 2.
    pub row_offset: usize,
    pub conflicting_value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub batch_id: String,
    pub student_id: String,
    pub is_new_student: bool,
    pub has_inconsistent_special_needs: bool,
    pub has_special_needs_changes: bool,
    pub special_needs_data: SpecialNeedsData,
    pub inconsistencies_data: Vec<SpecialNeedInconsistency>,
}

/// Filter for the paged listings.
#[derive(Debug, Default, Clone)]
pub struct SummaryFilter {
    pub batch_id: Option<String>,
    /// Case-insensitive substring over the listing's identity columns.
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl RouteRunSummary {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            batch_id: row.get("batch_id")?,
            route_id: row.get("route_id")?,
            run_index: row.get("run_index")?,
            ugeocode: row.get("ugeocode")?,
            run_freq: row.get("run_freq")?,
            runs_count: row.get("runs_count")?,
            is_new_route: row.get("is_new_route")?,
            has_inconsistent_frequency: row.get("has_inconsistent_frequency")?,
            has_stacked_runs: row.get("has_stacked_runs")?,
            validation_details: json_column(row, "validation_details")?,
        })
    }
}

impl SchoolSummary {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            batch_id: row.get("batch_id")?,
            sch_code: row.get("sch_code")?,
            sch_name: row.get("sch_name")?,
            is_unknown_school: row.get("is_unknown_school")?,
            record_count: row.get("record_count")?,
        })
    }
}

impl StudentSummary {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            batch_id: row.get("batch_id")?,
            student_id: row.get("student_id")?,
            is_new_student: row.get("is_new_student")?,
            has_inconsistent_special_needs: row.get("has_inconsistent_special_needs")?,
            has_special_needs_changes: row.get("has_special_needs_changes")?,
            special_needs_data: json_column(row, "special_needs_data")?,
            inconsistencies_data: json_column(row, "inconsistencies_data")?,
        })
    }
}

pub fn upsert_route_run(conn: &Connection, summary: &RouteRunSummary) -> Result<(), DatabaseError> {
    let details = serde_json::to_string(&summary.validation_details)?;
    conn.execute(
        "INSERT INTO route_run_validation_summaries (batch_id, route_id, run_index, ugeocode,
         run_freq, runs_count, is_new_route, has_inconsistent_frequency, has_stacked_runs,
         validation_details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(batch_id, route_id, run_index) DO UPDATE SET
             ugeocode = excluded.ugeocode,
             run_freq = excluded.run_freq,
             runs_count = excluded.runs_count,
             is_new_route = excluded.is_new_route,
             has_inconsistent_frequency = excluded.has_inconsistent_frequency,
             has_stacked_runs = excluded.has_stacked_runs,
             validation_details = excluded.validation_details",
        params![
            summary.batch_id,
            summary.route_id,
            summary.run_index,
            summary.ugeocode,
            summary.run_freq,
            summary.runs_count,
            summary.is_new_route,
            summary.has_inconsistent_frequency,
            summary.has_stacked_runs,
            details,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

pub fn upsert_school(conn: &Connection, summary: &SchoolSummary) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO school_validation_summaries (batch_id, sch_code, sch_name,
         is_unknown_school, record_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(batch_id, sch_code) DO UPDATE SET
             sch_name = excluded.sch_name,
             is_unknown_school = excluded.is_unknown_school,
             record_count = excluded.record_count",
        params![
            summary.batch_id,
            summary.sch_code,
            summary.sch_name,
            summary.is_unknown_school,
            summary.record_count,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

pub fn upsert_student(conn: &Connection, summary: &StudentSummary) -> Result<(), DatabaseError> {
    let special_needs = serde_json::to_string(&summary.special_needs_data)?;
    let inconsistencies = serde_json::to_string(&summary.inconsistencies_data)?;
    conn.execute(
        "INSERT INTO student_information_summaries (batch_id, student_id, is_new_student,
         has_inconsistent_special_needs, has_special_needs_changes, special_needs_data,
         inconsistencies_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(batch_id, student_id) DO UPDATE SET
             is_new_student = excluded.is_new_student,
             has_inconsistent_special_needs = excluded.has_inconsistent_special_needs,
             has_special_needs_changes = excluded.has_special_needs_changes,
             special_needs_data = excluded.special_needs_data,
             inconsistencies_data = excluded.inconsistencies_data",
        params![
            summary.batch_id,
            summary.student_id,
            summary.is_new_student,
            summary.has_inconsistent_special_needs,
            summary.has_special_needs_changes,
            special_needs,
            inconsistencies,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

/// Shape of one paged listing.
struct Listing<'a> {
    /// FROM clause, possibly a join.
    source: &'a str,
    select: &'a str,
    batch_column: &'a str,
    search_columns: &'a [&'a str],
    order_by: &'a str,
}

fn query_page<T, F>(
    db: &Database,
    listing: &Listing<'_>,
    filter: &SummaryFilter,
    map: F,
) -> Result<(Vec<T>, u64), DatabaseError>
where
    F: Fn(&Row<'_>) -> Result<T, rusqlite::Error>,
{
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref batch_id) = filter.batch_id {
            conditions.push(format!(
                "{} = ?{}",
                listing.batch_column,
                param_values.len() + 1
            ));
            param_values.push(Box::new(batch_id.clone()));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let index = param_values.len() + 1;
            let matches: Vec<String> = listing
                .search_columns
                .iter()
                .map(|column| format!("{} LIKE ?{} ESCAPE '\\'", column, index))
                .collect();
            conditions.push(format!("({})", matches.join(" OR ")));
            param_values.push(Box::new(format!("%{}%", escape_like(search))));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM {} {}", listing.source, where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT {} FROM {} {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            listing.select,
            listing.source,
            where_clause,
            listing.order_by,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<T> = stmt
            .query_map(params_ref.as_slice(), |r| map(r))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn list_route_runs(
    db: &Database,
    filter: &SummaryFilter,
) -> Result<(Vec<RouteRunSummary>, u64), DatabaseError> {
    let listing = Listing {
        source: "route_run_validation_summaries",
        select: "*",
        batch_column: "batch_id",
        search_columns: &["route_id", "run_index"],
        order_by: "batch_id, route_id, run_index",
    };
    query_page(db, &listing, filter, RouteRunSummary::from_row)
}

pub fn list_schools(
    db: &Database,
    filter: &SummaryFilter,
) -> Result<(Vec<SchoolSummary>, u64), DatabaseError> {
    let listing = Listing {
        source: "school_validation_summaries",
        select: "*",
        batch_column: "batch_id",
        search_columns: &["sch_code", "sch_name"],
        order_by: "batch_id, sch_code",
    };
    query_page(db, &listing, filter, SchoolSummary::from_row)
}

pub fn list_students(
    db: &Database,
    filter: &SummaryFilter,
) -> Result<(Vec<StudentSummary>, u64), DatabaseError> {
    let listing = Listing {
        source: "student_information_summaries",
        select: "*",
        batch_column: "batch_id",
        search_columns: &["student_id"],
        order_by: "batch_id, student_id",
    };
    query_page(db, &listing, filter, StudentSummary::from_row)
}

/// Raw import rows, ordered as they were ingested.
pub fn list_rows(
    db: &Database,
    filter: &SummaryFilter,
) -> Result<(Vec<StoredRow>, u64), DatabaseError> {
    let listing = Listing {
        source: "student_route_rows r JOIN uploaded_files f ON f.id = r.uploaded_file_id",
        select: "r.*",
        batch_column: "f.batch_id",
        search_columns: &[
            "r.student_id",
            "r.student_first_name",
            "r.student_last_name",
            "r.route_id",
            "r.sch_code",
        ],
        order_by: "f.batch_id, f.position, r.row_number, r.id",
    };
    query_page(db, &listing, filter, StoredRow::from_row)
}
