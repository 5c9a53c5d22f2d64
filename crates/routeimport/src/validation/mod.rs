//! Cross-checks of an imported batch against master data.
//!
//! Each validator groups the batch's rows by its key and upserts one summary
//! per group. The suite runs them all inside one transaction, so readers see
//! either the previous summaries or the complete new set.

pub mod error;
pub mod route_run;
pub mod school;
pub mod student;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::batch::{BatchStatus, ValidationStatus};
use crate::broadcast::import_progress::{ImportPhase, ImportProgressEvent};
use crate::db::{batch_repo, now_timestamp, row_repo, Database, DatabaseError};
use crate::ingest::progress::ProgressReporter;
use crate::spreadsheet::StudentRouteRow;

pub use error::ValidationError;
pub use route_run::RouteRunValidator;
pub use school::SchoolValidator;
pub use student::StudentValidator;

/// Which summary table a validator writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    RouteRuns,
    Schools,
    Students,
}

pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> SummaryKind;

    /// Upserts the summaries for `rows` (the whole batch, in ingestion
    /// order) and returns how many were written.
    fn validate(
        &self,
        conn: &Connection,
        batch_id: &str,
        rows: &[StudentRouteRow],
    ) -> Result<usize, DatabaseError>;
}

/// Summary counts written by one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub batch_id: String,
    pub route_runs: usize,
    pub schools: usize,
    pub students: usize,
}

impl ValidationReport {
    fn record(&mut self, kind: SummaryKind, count: usize) {
        match kind {
            SummaryKind::RouteRuns => self.route_runs += count,
            SummaryKind::Schools => self.schools += count,
            SummaryKind::Students => self.students += count,
        }
    }
}

fn load_rows(conn: &Connection, batch_id: &str) -> Result<Vec<StudentRouteRow>, ValidationError> {
    if batch_repo::find_by_id(conn, batch_id)?.is_none() {
        return Err(ValidationError::BatchNotFound(batch_id.to_string()));
    }
    Ok(row_repo::rows_for_batch(conn, batch_id)?
        .into_iter()
        .map(|stored| stored.row)
        .collect())
}

fn apply(
    validator: &dyn Validator,
    conn: &Connection,
    batch_id: &str,
    rows: &[StudentRouteRow],
) -> Result<usize, ValidationError> {
    let _span = info_span!("validator", name = validator.name()).entered();
    validator
        .validate(conn, batch_id, rows)
        .map_err(|source| ValidationError::Validator {
            validator: validator.name(),
            source,
        })
}

/// Runs a single validator as its own atomic unit of work.
pub fn run_validator(
    db: &Database,
    batch_id: &str,
    validator: &dyn Validator,
) -> Result<usize, ValidationError> {
    db.with_transaction(|conn| {
        let rows = load_rows(conn, batch_id)?;
        apply(validator, conn, batch_id, &rows)
    })
}

pub struct ValidationSuite {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidationSuite {
    /// The route/run, school and student validators.
    pub fn new() -> Self {
        Self::with_validators(vec![
            Box::new(RouteRunValidator),
            Box::new(SchoolValidator),
            Box::new(StudentValidator),
        ])
    }

    pub fn with_validators(validators: Vec<Box<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// Runs every validator in one transaction. Any failure rolls back all
    /// of them and leaves the previous summaries in place.
    pub fn run(&self, db: &Database, batch_id: &str) -> Result<ValidationReport, ValidationError> {
        db.with_transaction(|conn| {
            let rows = load_rows(conn, batch_id)?;
            let mut report = ValidationReport {
                batch_id: batch_id.to_string(),
                ..Default::default()
            };
            for validator in &self.validators {
                let count = apply(validator.as_ref(), conn, batch_id, &rows)?;
                report.record(validator.kind(), count);
            }
            Ok(report)
        })
    }

    /// Validates a completed batch and records the outcome on the batch
    /// (`validation_status`, `validation_error`, `validated_at`).
    pub fn validate_batch(
        &self,
        db: &Database,
        batch_id: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<ValidationReport, ValidationError> {
        let _span = info_span!("validate_batch", batch_id = %batch_id).entered();

        db.with_transaction(|conn| -> Result<(), ValidationError> {
            let batch = batch_repo::find_by_id(conn, batch_id)?
                .ok_or_else(|| ValidationError::BatchNotFound(batch_id.to_string()))?;
            if batch.status != BatchStatus::Completed.as_str() {
                return Err(ValidationError::NotReady {
                    batch_id: batch_id.to_string(),
                    status: batch.status,
                });
            }
            batch_repo::set_validation(conn, batch_id, ValidationStatus::Running.as_str(), None, None)?;
            Ok(())
        })?;
        reporter.report(ImportProgressEvent::new(
            batch_id,
            ImportPhase::Validating,
            "Validating batch",
        ));

        match self.run(db, batch_id) {
            Ok(report) => {
                let validated_at = now_timestamp();
                db.with_conn(|conn| {
                    batch_repo::set_validation(
                        conn,
                        batch_id,
                        ValidationStatus::Completed.as_str(),
                        None,
                        Some(&validated_at),
                    )
                })?;
                info!(
                    "Validated batch {}: {} route/run, {} school, {} student summaries",
                    batch_id, report.route_runs, report.schools, report.students
                );
                reporter.report(ImportProgressEvent::new(
                    batch_id,
                    ImportPhase::Completed,
                    "Validation completed",
                ));
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Validation of batch {} failed: {}", batch_id, message);
                db.with_conn(|conn| {
                    batch_repo::set_validation(
                        conn,
                        batch_id,
                        ValidationStatus::Failed.as_str(),
                        Some(&message),
                        None,
                    )
                })?;
                reporter.report(
                    ImportProgressEvent::new(batch_id, ImportPhase::Failed, "Validation failed")
                        .with_error(&message),
                );
                Err(e)
            }
        }
    }
}

impl Default for ValidationSuite {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct non-empty values in first-seen order.
pub(crate) fn distinct_non_empty<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !value.is_empty() && !out.iter().any(|seen| seen == value) {
            out.push(value.to_string());
        }
    }
    out
}
