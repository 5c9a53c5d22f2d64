//! Test harness for isolated import runs.
//!
//! The `TestHarness` struct owns everything one scenario needs:
//! - a temporary blob store directory
//! - an in-memory database with every migration applied
//! - an uploader whose queue hands chains back to the test
//! - master-data seeding helpers and summary lookups

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use routeimport::db::file_repo::FileRow;
use routeimport::db::master_repo;
use routeimport::db::summary_repo::{
    self, RouteRunSummary, SchoolSummary, StudentSummary, SummaryFilter,
};
use routeimport::ingest::RecordingProgress;
use routeimport::{
    BatchChain, BatchDetail, BatchManager, ChainQueue, ChainResult, ChainRunner, Database,
    FileSystemBlobStore, Result, UploadFile, UploadPolicy, Uploader, WorkerError,
};

/// Holds chains until the test runs them.
#[derive(Default)]
pub struct HeldQueue {
    chains: Mutex<Vec<BatchChain>>,
}

impl HeldQueue {
    pub fn take(&self) -> Vec<BatchChain> {
        std::mem::take(&mut *self.chains.lock().unwrap())
    }
}

impl ChainQueue for HeldQueue {
    fn enqueue(&self, chain: BatchChain) -> std::result::Result<(), WorkerError> {
        self.chains.lock().unwrap().push(chain);
        Ok(())
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub blobs: Arc<FileSystemBlobStore>,
    pub queue: Arc<HeldQueue>,
    pub uploader: Uploader,
    pub batches: BatchManager,
    pub progress: RecordingProgress,
    flush_interval: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_policy(UploadPolicy::default())
    }

    pub fn with_policy(policy: UploadPolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        let blobs = Arc::new(FileSystemBlobStore::new(temp_dir.path().join("uploads")));
        let queue = Arc::new(HeldQueue::default());
        let uploader = Uploader::new(db.clone(), blobs.clone(), queue.clone(), policy);

        Self {
            temp_dir,
            batches: BatchManager::new(db.clone()),
            db,
            blobs,
            queue,
            uploader,
            progress: RecordingProgress::new(),
            flush_interval: 100,
        }
    }

    pub fn flush_interval(mut self, rows: usize) -> Self {
        self.flush_interval = rows;
        self
    }

    pub fn runner(&self) -> ChainRunner {
        ChainRunner::new(self.db.clone(), self.blobs.clone()).with_flush_interval(self.flush_interval)
    }

    pub fn create_batch(&self, name: &str) -> String {
        self.batches.create_batch(name, Some("tester")).unwrap().id
    }

    pub fn upload(&self, batch_id: &str, files: Vec<UploadFile>) -> Result<Vec<FileRow>> {
        self.uploader.upload(batch_id, &files, Some("tester"))
    }

    /// Runs every chain queued so far, in submission order.
    pub fn run_queued(&self) -> Vec<ChainResult> {
        self.queue
            .take()
            .iter()
            .map(|chain| self.runner().run(chain, &self.progress).unwrap())
            .collect()
    }

    /// Uploads the files as one submission and runs its chain to the end.
    pub fn import(&self, batch_id: &str, files: Vec<UploadFile>) -> ChainResult {
        self.upload(batch_id, files).unwrap();
        let mut results = self.run_queued();
        assert_eq!(results.len(), 1, "expected exactly one chain");
        results.remove(0)
    }

    pub fn detail(&self, batch_id: &str) -> BatchDetail {
        self.batches.batch_detail(batch_id).unwrap()
    }

    pub fn school(&self, code: &str, name: &str) {
        self.db
            .with_conn(|conn| master_repo::upsert_school(conn, code, name, true))
            .unwrap();
    }

    pub fn school_map(&self, legacy_code: &str, school_code: &str) {
        self.db
            .with_conn(|conn| master_repo::upsert_school_map(conn, legacy_code, school_code))
            .unwrap();
    }

    pub fn route(&self, code: &str) {
        self.db
            .with_conn(|conn| master_repo::upsert_route(conn, code, ""))
            .unwrap();
    }

    pub fn student(&self, code: &str, needs: &[&str]) {
        let needs: Vec<String> = needs.iter().map(|n| n.to_string()).collect();
        self.db
            .with_conn(|conn| {
                master_repo::upsert_student(conn, code, "", "")?;
                master_repo::set_student_special_needs(conn, code, &needs)
            })
            .unwrap();
    }

    fn filter(batch_id: &str) -> SummaryFilter {
        SummaryFilter {
            batch_id: Some(batch_id.to_string()),
            ..Default::default()
        }
    }

    pub fn route_runs(&self, batch_id: &str) -> Vec<RouteRunSummary> {
        summary_repo::list_route_runs(&self.db, &Self::filter(batch_id))
            .unwrap()
            .0
    }

    pub fn route_run(&self, batch_id: &str, route: &str, run: &str) -> RouteRunSummary {
        self.route_runs(batch_id)
            .into_iter()
            .find(|s| s.route_id == route && s.run_index == run)
            .unwrap_or_else(|| panic!("no summary for {}/{}", route, run))
    }

    pub fn schools(&self, batch_id: &str) -> Vec<SchoolSummary> {
        summary_repo::list_schools(&self.db, &Self::filter(batch_id))
            .unwrap()
            .0
    }

    pub fn school_summary(&self, batch_id: &str, code: &str) -> SchoolSummary {
        self.schools(batch_id)
            .into_iter()
            .find(|s| s.sch_code == code)
            .unwrap_or_else(|| panic!("no summary for school {}", code))
    }

    pub fn students(&self, batch_id: &str) -> Vec<StudentSummary> {
        summary_repo::list_students(&self.db, &Self::filter(batch_id))
            .unwrap()
            .0
    }

    pub fn student_summary(&self, batch_id: &str, student_id: &str) -> StudentSummary {
        self.students(batch_id)
            .into_iter()
            .find(|s| s.student_id == student_id)
            .unwrap_or_else(|| panic!("no summary for student {}", student_id))
    }

    /// Every column of a summary table, as text, in id order.
    pub fn dump_table(&self, table: &str) -> Vec<Vec<String>> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY id", table))?;
                let columns = stmt.column_count();
                let rows = stmt
                    .query_map([], |row| {
                        (0..columns)
                            .map(|i| {
                                let value: rusqlite::types::Value = row.get(i)?;
                                Ok(format!("{:?}", value))
                            })
                            .collect::<std::result::Result<Vec<String>, rusqlite::Error>>()
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap()
    }
}
