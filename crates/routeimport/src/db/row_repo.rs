//! Raw import rows: the append-only `student_route_rows` table.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;

use super::{now_timestamp, DatabaseError};
use crate::special_needs::SpecialNeed;
use crate::spreadsheet::StudentRouteRow;

const TEXT_COLUMNS: [&str; 20] = [
    "student_id",
    "student_last_name",
    "student_first_name",
    "student_dob",
    "student_grade",
    "cur_school_code",
    "sch_code",
    "sch_name",
    "route_id",
    "route_description",
    "run_index",
    "run_description",
    "run_freq",
    "stop_id",
    "stop_description",
    "stop_time",
    "ugeocode",
    "address",
    "city",
    "zip_code",
];

fn text_values(row: &StudentRouteRow) -> [&str; 20] {
    [
        row.student_id.as_str(),
        row.student_last_name.as_str(),
        row.student_first_name.as_str(),
        row.student_dob.as_str(),
        row.student_grade.as_str(),
        row.cur_school_code.as_str(),
        row.sch_code.as_str(),
        row.sch_name.as_str(),
        row.route_id.as_str(),
        row.route_description.as_str(),
        row.run_index.as_str(),
        row.run_description.as_str(),
        row.run_freq.as_str(),
        row.stop_id.as_str(),
        row.stop_description.as_str(),
        row.stop_time.as_str(),
        row.ugeocode.as_str(),
        row.address.as_str(),
        row.city.as_str(),
        row.zip_code.as_str(),
    ]
}

fn insert_sql() -> String {
    let columns: Vec<&str> = ["uploaded_file_id", "row_number", "created_at"]
        .into_iter()
        .chain(TEXT_COLUMNS)
        .chain(SpecialNeed::ALL.into_iter().map(|n| n.column()))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO student_route_rows ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// A stored import row with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRow {
    pub id: i64,
    pub uploaded_file_id: String,
    /// 1-based data line within the file.
    pub row_number: i64,
    pub row: StudentRouteRow,
}

impl StoredRow {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let mut data = StudentRouteRow {
            student_id: row.get("student_id")?,
            student_last_name: row.get("student_last_name")?,
            student_first_name: row.get("student_first_name")?,
            student_dob: row.get("student_dob")?,
            student_grade: row.get("student_grade")?,
            cur_school_code: row.get("cur_school_code")?,
            sch_code: row.get("sch_code")?,
            sch_name: row.get("sch_name")?,
            route_id: row.get("route_id")?,
            route_description: row.get("route_description")?,
            run_index: row.get("run_index")?,
            run_description: row.get("run_description")?,
            run_freq: row.get("run_freq")?,
            stop_id: row.get("stop_id")?,
            stop_description: row.get("stop_description")?,
            stop_time: row.get("stop_time")?,
            ugeocode: row.get("ugeocode")?,
            address: row.get("address")?,
            city: row.get("city")?,
            zip_code: row.get("zip_code")?,
            ..Default::default()
        };
        for need in SpecialNeed::ALL {
            let flag: bool = row.get(need.column())?;
            data.special_needs.set(need, flag);
        }
        Ok(Self {
            id: row.get("id")?,
            uploaded_file_id: row.get("uploaded_file_id")?,
            row_number: row.get("row_number")?,
            row: data,
        })
    }
}

/// Appends one row. Rows are never updated afterwards.
pub fn insert(
    conn: &Connection,
    uploaded_file_id: &str,
    row_number: i64,
    row: &StudentRouteRow,
) -> Result<i64, DatabaseError> {
    let mut values: Vec<Value> = Vec::with_capacity(35);
    values.push(Value::Text(uploaded_file_id.to_string()));
    values.push(Value::Integer(row_number));
    values.push(Value::Text(now_timestamp()));
    values.extend(text_values(row).iter().map(|v| Value::Text(v.to_string())));
    values.extend(
        SpecialNeed::ALL
            .into_iter()
            .map(|need| Value::Integer(i64::from(row.special_needs.get(need)))),
    );

    let mut stmt = conn.prepare_cached(&insert_sql())?;
    stmt.execute(params_from_iter(values))?;
    Ok(conn.last_insert_rowid())
}

/// All rows of a batch in file order, then line order.
pub fn rows_for_batch(conn: &Connection, batch_id: &str) -> Result<Vec<StoredRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT r.* FROM student_route_rows r
         JOIN uploaded_files f ON f.id = r.uploaded_file_id
         WHERE f.batch_id = ?1
         ORDER BY f.position, r.row_number, r.id",
    )?;
    let rows = stmt
        .query_map(params![batch_id], StoredRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_for_file(conn: &Connection, uploaded_file_id: &str) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM student_route_rows WHERE uploaded_file_id = ?1",
        params![uploaded_file_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Distinct non-empty run indices seen for a route anywhere in the batch.
pub fn runs_count_for_route(
    conn: &Connection,
    batch_id: &str,
    route_id: &str,
) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT r.run_index) FROM student_route_rows r
         JOIN uploaded_files f ON f.id = r.uploaded_file_id
         WHERE f.batch_id = ?1 AND r.route_id = ?2 AND r.run_index != ''",
        params![batch_id, route_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Whether any stored row, from any batch, gives this route/run/geocode a
/// non-empty frequency other than `run_freq`.
pub fn has_other_frequency(
    conn: &Connection,
    route_id: &str,
    run_index: &str,
    ugeocode: &str,
    run_freq: &str,
) -> Result<bool, DatabaseError> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM student_route_rows
             WHERE route_id = ?1 AND run_index = ?2 AND ugeocode = ?3
               AND run_freq != '' AND run_freq != ?4
         )",
        params![route_id, run_index, ugeocode, run_freq],
        |r| r.get(0),
    )?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::batch_repo::{self, BatchRow};
    use crate::db::file_repo::{self, FileRow};
    use crate::db::Database;

    fn seed_file(conn: &Connection, batch_id: &str, file_id: &str, position: i64) {
        if batch_repo::find_by_id(conn, batch_id).unwrap().is_none() {
            batch_repo::insert(
                conn,
                &BatchRow {
                    id: batch_id.to_string(),
                    name: batch_id.to_string(),
                    status: "processing".to_string(),
                    validation_status: "not_run".to_string(),
                    validation_error: None,
                    validated_at: None,
                    created_by: None,
                    updated_by: None,
                    created_at: now_timestamp(),
                    updated_at: now_timestamp(),
                },
            )
            .unwrap();
        }
        file_repo::insert(
            conn,
            &FileRow {
                id: file_id.to_string(),
                batch_id: batch_id.to_string(),
                position,
                original_name: "routes.csv".to_string(),
                stored_path: "x/routes.csv".to_string(),
                mime_type: None,
                size_bytes: 1,
                total_records: 0,
                processed_records: 0,
                status: "processing".to_string(),
                error: None,
                uploaded_by: None,
                created_at: now_timestamp(),
                updated_at: now_timestamp(),
                started_at: None,
                completed_at: None,
            },
        )
        .unwrap();
    }

    fn route_row(student: &str, route: &str, run: &str, geo: &str, freq: &str) -> StudentRouteRow {
        StudentRouteRow {
            student_id: student.to_string(),
            route_id: route.to_string(),
            run_index: run.to_string(),
            ugeocode: geo.to_string(),
            run_freq: freq.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_read_back_all_fields() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed_file(conn, "b1", "f1", 1);
            let mut row = route_row("S1", "R1", "1", "G1", "DAILY");
            row.sch_name = "Lincoln".to_string();
            row.zip_code = "90210".to_string();
            row.special_needs.set(SpecialNeed::Need3, true);
            row.special_needs.set(SpecialNeed::OtherNeeds4, true);
            insert(conn, "f1", 1, &row)?;

            let stored = rows_for_batch(conn, "b1")?;
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0].row, row);
            assert_eq!(stored[0].row_number, 1);
            assert_eq!(count_for_file(conn, "f1")?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_rows_for_batch_orders_by_file_then_line() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed_file(conn, "b1", "f2", 2);
            seed_file(conn, "b1", "f1", 1);
            seed_file(conn, "b2", "other", 1);
            insert(conn, "f2", 1, &route_row("C", "R1", "1", "G", ""))?;
            insert(conn, "f1", 2, &route_row("B", "R1", "1", "G", ""))?;
            insert(conn, "f1", 1, &route_row("A", "R1", "1", "G", ""))?;
            insert(conn, "other", 1, &route_row("Z", "R1", "1", "G", ""))?;

            let ids: Vec<String> = rows_for_batch(conn, "b1")?
                .into_iter()
                .map(|r| r.row.student_id)
                .collect();
            assert_eq!(ids, vec!["A", "B", "C"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_runs_count_is_batch_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed_file(conn, "b1", "f1", 1);
            seed_file(conn, "b2", "f2", 1);
            insert(conn, "f1", 1, &route_row("A", "R1", "1", "G", ""))?;
            insert(conn, "f1", 2, &route_row("B", "R1", "2", "G", ""))?;
            insert(conn, "f1", 3, &route_row("C", "R1", "2", "G", ""))?;
            insert(conn, "f1", 4, &route_row("D", "R1", "", "G", ""))?;
            insert(conn, "f2", 1, &route_row("E", "R1", "3", "G", ""))?;

            assert_eq!(runs_count_for_route(conn, "b1", "R1")?, 2);
            assert_eq!(runs_count_for_route(conn, "b2", "R1")?, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_has_other_frequency_spans_batches() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            seed_file(conn, "old", "f0", 1);
            insert(conn, "f0", 1, &route_row("A", "R1", "1", "G1", "WEEKLY"))?;
            insert(conn, "f0", 2, &route_row("B", "R1", "1", "G2", ""))?;

            assert!(has_other_frequency(conn, "R1", "1", "G1", "DAILY")?);
            assert!(!has_other_frequency(conn, "R1", "1", "G1", "WEEKLY")?);
            // Empty stored frequencies never count.
            assert!(!has_other_frequency(conn, "R1", "1", "G2", "DAILY")?);
            assert!(!has_other_frequency(conn, "R1", "2", "G1", "DAILY")?);
            Ok(())
        })
        .unwrap();
    }
}
