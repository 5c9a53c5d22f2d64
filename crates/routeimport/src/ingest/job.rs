use std::path::Path;

use tracing::{debug, info, info_span, warn};

use crate::batch::{self, BatchStatus, FileStatus};
use crate::broadcast::import_progress::{FileContext, ImportPhase};
use crate::db::file_repo::{self, FileRow};
use crate::db::{row_repo, Database};
use crate::error::{Result, SpreadsheetError, WorkerError};
use crate::spreadsheet::{ReaderRegistry, SheetTable, SpreadsheetFormat, StudentRouteRow};
use crate::storage::BlobStore;

use super::progress::{FileProgress, ProgressReporter};

/// Rows between durable progress flushes.
pub const DEFAULT_FLUSH_INTERVAL: usize = 100;

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub file_id: String,
    pub status: FileStatus,
    pub total_records: i64,
    pub processed_records: i64,
    pub error: Option<String>,
    /// Batch status right after this file settled.
    pub batch_status: BatchStatus,
}

impl IngestOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == FileStatus::Completed
    }
}

/// Imports one uploaded file into `student_route_rows`.
pub struct IngestionJob<'a> {
    db: &'a Database,
    blobs: &'a dyn BlobStore,
    readers: &'a ReaderRegistry,
    flush_interval: usize,
}

impl<'a> IngestionJob<'a> {
    pub fn new(db: &'a Database, blobs: &'a dyn BlobStore, readers: &'a ReaderRegistry) -> Self {
        Self {
            db,
            blobs,
            readers,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval.max(1);
        self
    }

    /// Runs the job for `file_id`, which is file `position` of `count` in
    /// its chain.
    ///
    /// Parse and persistence failures are recorded on the file and batch and
    /// reported through the outcome; `Err` means the failure could not even
    /// be recorded.
    pub fn run(
        &self,
        file_id: &str,
        position: usize,
        count: usize,
        reporter: &dyn ProgressReporter,
    ) -> Result<IngestOutcome> {
        let file = self
            .db
            .with_conn(|conn| file_repo::find_by_id(conn, file_id))?
            .ok_or_else(|| WorkerError::UnknownFile(file_id.to_string()))?;

        let progress = FileProgress::new(
            FileContext {
                batch_id: file.batch_id.clone(),
                file_id: file.id.clone(),
                file_name: file.original_name.clone(),
                position,
                count,
            },
            reporter,
        );

        let _job_span = info_span!("ingest_file",
            batch_id = %file.batch_id,
            file_id = %file.id,
            position = position,
            count = count,
        )
        .entered();

        // Step 1: mark processing
        self.db
            .with_conn(|conn| file_repo::mark_processing(conn, &file.id))?;

        let mut tally = Tally::default();
        match self.ingest(&file, &progress, &mut tally) {
            Ok(()) => self.finish_success(&file, &progress, &tally),
            Err(e) => self.finish_failure(&file, &progress, &tally, &e.to_string()),
        }
    }

    fn ingest(&self, file: &FileRow, progress: &FileProgress<'_>, tally: &mut Tally) -> Result<()> {
        // Step 2: parse
        let table = {
            let _step = info_span!("parse").entered();
            progress.phase(ImportPhase::Parsing, "Reading spreadsheet");
            self.parse(file)?
        };

        // Step 3: record total before any row
        tally.total = table.len() as i64;
        self.db
            .with_conn(|conn| file_repo::set_total_records(conn, &file.id, tally.total))?;
        progress.records(0, tally.total);

        // Step 4: persist rows, flushing the counter every `flush_interval` rows
        let _step = info_span!("persist_rows", total = tally.total).entered();
        let rows: Vec<StudentRouteRow> = table.into_rows().collect();
        for (chunk_index, chunk) in rows.chunks(self.flush_interval).enumerate() {
            let first_row_number = (chunk_index * self.flush_interval) as i64 + 1;
            let processed = tally.processed + chunk.len() as i64;
            self.db.with_transaction(|conn| -> Result<()> {
                for (offset, row) in chunk.iter().enumerate() {
                    row_repo::insert(conn, &file.id, first_row_number + offset as i64, row)?;
                }
                file_repo::set_processed_records(conn, &file.id, processed)?;
                Ok(())
            })?;
            tally.processed = processed;
            debug!("Flushed {}/{} rows of {}", tally.processed, tally.total, file.id);
            progress.records(tally.processed, tally.total);
        }

        Ok(())
    }

    fn parse(&self, file: &FileRow) -> Result<SheetTable> {
        let format = SpreadsheetFormat::from_path(Path::new(&file.stored_path))
            .or_else(|| SpreadsheetFormat::from_path(Path::new(&file.original_name)))
            .ok_or_else(|| SpreadsheetError::UnsupportedFormat(file.original_name.clone()))?;
        let mut source = self.blobs.open(&file.stored_path)?;
        Ok(self.readers.read(format, source.as_mut())?)
    }

    // Step 5: exact count, completed, then recompute the batch
    fn finish_success(
        &self,
        file: &FileRow,
        progress: &FileProgress<'_>,
        tally: &Tally,
    ) -> Result<IngestOutcome> {
        let batch_status = self.db.with_transaction(|conn| -> Result<BatchStatus> {
            file_repo::mark_completed(conn, &file.id, tally.processed)?;
            batch::recompute_status_in(conn, &file.batch_id)
        })?;

        info!(
            "Imported {} rows from {} ({} of {})",
            tally.processed,
            file.original_name,
            progress.context().position,
            progress.context().count
        );
        progress.completed(tally.processed);

        Ok(IngestOutcome {
            file_id: file.id.clone(),
            status: FileStatus::Completed,
            total_records: tally.total,
            processed_records: tally.processed,
            error: None,
            batch_status,
        })
    }

    // Step 6: failed file, failed batch
    fn finish_failure(
        &self,
        file: &FileRow,
        progress: &FileProgress<'_>,
        tally: &Tally,
        error: &str,
    ) -> Result<IngestOutcome> {
        warn!("Import of {} failed: {}", file.original_name, error);

        self.db.with_transaction(|conn| -> Result<()> {
            file_repo::mark_failed(conn, &file.id, error)?;
            batch::mark_failed_in(conn, &file.batch_id)?;
            Ok(())
        })?;
        progress.failed(tally.processed, tally.total, error);

        Ok(IngestOutcome {
            file_id: file.id.clone(),
            status: FileStatus::Failed,
            total_records: tally.total,
            processed_records: tally.processed,
            error: Some(error.to_string()),
            batch_status: BatchStatus::Failed,
        })
    }
}

#[derive(Debug, Default)]
struct Tally {
    total: i64,
    processed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchManager;
    use crate::db::{batch_repo, now_timestamp};
    use crate::ingest::progress::{NoopProgress, RecordingProgress};
    use crate::storage::FileSystemBlobStore;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        db: Database,
        blobs: FileSystemBlobStore,
        readers: ReaderRegistry,
        batch_id: String,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let db = Database::open_in_memory().unwrap();
            let blobs = FileSystemBlobStore::new(temp.path());
            let batch_id = BatchManager::new(db.clone())
                .create_batch("test", None)
                .unwrap()
                .id;
            db.with_conn(|conn| batch_repo::set_status(conn, &batch_id, "processing", None))
                .unwrap();
            Self {
                _temp: temp,
                db,
                blobs,
                readers: ReaderRegistry::new(),
                batch_id,
            }
        }

        fn attach(&self, name: &str, content: &[u8], position: i64) -> String {
            let stored_path = self.blobs.put(name, content).unwrap();
            let id = format!("file-{}", position);
            let file = FileRow {
                id: id.clone(),
                batch_id: self.batch_id.clone(),
                position,
                original_name: name.to_string(),
                stored_path,
                mime_type: None,
                size_bytes: content.len() as i64,
                total_records: 0,
                processed_records: 0,
                status: "pending".to_string(),
                error: None,
                uploaded_by: None,
                created_at: now_timestamp(),
                updated_at: now_timestamp(),
                started_at: None,
                completed_at: None,
            };
            self.db.with_conn(|conn| file_repo::insert(conn, &file)).unwrap();
            id
        }

        fn job(&self) -> IngestionJob<'_> {
            IngestionJob::new(&self.db, &self.blobs, &self.readers)
        }

        fn file(&self, id: &str) -> FileRow {
            self.db
                .with_conn(|conn| file_repo::find_by_id(conn, id))
                .unwrap()
                .unwrap()
        }

        fn batch_status(&self) -> String {
            self.db
                .with_conn(|conn| batch_repo::find_by_id(conn, &self.batch_id))
                .unwrap()
                .unwrap()
                .status
        }
    }

    fn csv_with_rows(count: usize) -> Vec<u8> {
        let mut text = String::from("student_id,route_id,run_index,run_freq\n");
        for i in 0..count {
            text.push_str(&format!("S{},R1,1,DAILY\n", i));
        }
        text.into_bytes()
    }

    #[test]
    fn test_success_completes_file_and_batch() {
        let fx = Fixture::new();
        let id = fx.attach("routes.csv", &csv_with_rows(3), 1);

        let outcome = fx.job().run(&id, 1, 1, &NoopProgress).unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.total_records, 3);
        assert_eq!(outcome.processed_records, 3);
        assert_eq!(outcome.batch_status, BatchStatus::Completed);

        let file = fx.file(&id);
        assert_eq!(file.status, "completed");
        assert_eq!(file.total_records, 3);
        assert_eq!(file.processed_records, 3);
        assert!(file.started_at.is_some() && file.completed_at.is_some());
        assert_eq!(fx.batch_status(), "completed");

        let rows = fx
            .db
            .with_conn(|conn| row_repo::rows_for_batch(conn, &fx.batch_id))
            .unwrap();
        let numbers: Vec<i64> = rows.iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_progress_flushes_at_interval() {
        let fx = Fixture::new();
        let id = fx.attach("routes.csv", &csv_with_rows(250), 1);
        let recorder = RecordingProgress::new();

        fx.job()
            .with_flush_interval(100)
            .run(&id, 1, 1, &recorder)
            .unwrap();

        let ingesting: Vec<i64> = recorder
            .events()
            .iter()
            .filter(|e| e.phase == ImportPhase::Ingesting)
            .map(|e| e.processed_records)
            .collect();
        assert_eq!(ingesting, vec![0, 100, 200, 250]);
        assert!(recorder
            .events()
            .iter()
            .filter(|e| e.phase == ImportPhase::Ingesting)
            .all(|e| e.total_records == 250));
        assert_eq!(fx.file(&id).processed_records, 250);
    }

    #[test]
    fn test_header_only_file_completes_with_zero_rows() {
        let fx = Fixture::new();
        let id = fx.attach("routes.csv", b"student_id,route_id\n", 1);

        let outcome = fx.job().run(&id, 1, 1, &NoopProgress).unwrap();
        assert!(outcome.succeeded());
        assert_eq!(fx.file(&id).total_records, 0);
    }

    #[test]
    fn test_malformed_file_fails_file_and_batch() {
        let fx = Fixture::new();
        let id = fx.attach("routes.xlsx", b"this is not a zip archive", 1);
        let recorder = RecordingProgress::new();

        let outcome = fx.job().run(&id, 1, 1, &recorder).unwrap();
        assert_eq!(outcome.status, FileStatus::Failed);
        assert_eq!(outcome.batch_status, BatchStatus::Failed);
        assert!(outcome.error.is_some());

        let file = fx.file(&id);
        assert_eq!(file.status, "failed");
        assert!(file.error.unwrap().contains("XLSX"));
        assert_eq!(fx.batch_status(), "failed");

        let last = recorder.events().pop().unwrap();
        assert_eq!(last.phase, ImportPhase::Failed);
    }

    #[test]
    fn test_missing_blob_fails_file() {
        let fx = Fixture::new();
        let id = fx.attach("routes.csv", &csv_with_rows(1), 1);
        std::fs::remove_file(fx.blobs.root().join(fx.file(&id).stored_path)).unwrap();

        let outcome = fx.job().run(&id, 1, 1, &NoopProgress).unwrap();
        assert_eq!(outcome.status, FileStatus::Failed);
        assert_eq!(fx.batch_status(), "failed");
    }

    #[test]
    fn test_unknown_file_is_error() {
        let fx = Fixture::new();
        assert!(fx.job().run("nope", 1, 1, &NoopProgress).is_err());
    }
}
