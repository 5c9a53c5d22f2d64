use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, info_span};

use crate::batch::{self, BatchStatus, FileStatus};
use crate::broadcast::import_progress::{ImportPhase, ImportProgressEvent};
use crate::db::file_repo::FileRow;
use crate::db::{batch_repo, file_repo, Database, DatabaseError};
use crate::error::{BatchError, Result, WorkerError};
use crate::ingest::{IngestOutcome, IngestionJob, ProgressReporter, DEFAULT_FLUSH_INTERVAL};
use crate::spreadsheet::ReaderRegistry;
use crate::storage::BlobStore;
use crate::validation::{ValidationReport, ValidationSuite};

/// Files of one upload, ingested strictly in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchChain {
    pub batch_id: String,
    pub file_ids: Vec<String>,
}

impl BatchChain {
    pub fn new(batch_id: impl Into<String>, file_ids: Vec<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            file_ids,
        }
    }
}

#[derive(Debug)]
pub struct ChainResult {
    pub batch_id: String,
    /// Batch status once every file settled.
    pub batch_status: BatchStatus,
    pub outcomes: Vec<IngestOutcome>,
    /// `None` when the batch did not complete and validation was skipped.
    pub validation: Option<std::result::Result<ValidationReport, String>>,
}

impl ChainResult {
    pub fn succeeded(&self) -> bool {
        self.batch_status == BatchStatus::Completed && matches!(self.validation, Some(Ok(_)))
    }
}

/// Somewhere a chain can be handed off to run later.
pub trait ChainQueue: Send + Sync {
    fn enqueue(&self, chain: BatchChain) -> std::result::Result<(), WorkerError>;
}

/// One lock per batch with a chain in flight.
#[derive(Default)]
struct BatchLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BatchLocks {
    fn acquire(&self, batch_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(batch_id.to_string()).or_default().clone()
    }

    fn release(&self, batch_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `lock` are the only holders once nobody waits.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(batch_id);
        }
    }
}

/// Runs a chain: each file only after the previous one settled, then the
/// validators once the batch completed.
///
/// Chains of the same batch never overlap, even on different threads.
pub struct ChainRunner {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    readers: ReaderRegistry,
    suite: ValidationSuite,
    flush_interval: usize,
    batch_locks: BatchLocks,
}

impl ChainRunner {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            db,
            blobs,
            readers: ReaderRegistry::new(),
            suite: ValidationSuite::new(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            batch_locks: BatchLocks::default(),
        }
    }

    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn with_suite(mut self, suite: ValidationSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn run(&self, chain: &BatchChain, reporter: &dyn ProgressReporter) -> Result<ChainResult> {
        if chain.file_ids.is_empty() {
            return Err(WorkerError::EmptyChain(chain.batch_id.clone()).into());
        }

        let lock = self.batch_locks.acquire(&chain.batch_id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.run_exclusive(chain, reporter)
        };
        self.batch_locks.release(&chain.batch_id, lock);
        result
    }

    /// Files to ingest for `chain`, in attachment order.
    ///
    /// Pending files attached earlier to the same batch come first; a chain
    /// that got here before an earlier one takes over its files. Files that
    /// already settled are left alone. Unknown ids stay so they get recorded
    /// as failures.
    fn plan(&self, chain: &BatchChain) -> Result<Vec<String>> {
        let plan = self.db.with_conn(|conn| {
            let mut own: Vec<(String, Option<FileRow>)> = Vec::with_capacity(chain.file_ids.len());
            for id in &chain.file_ids {
                own.push((id.clone(), file_repo::find_by_id(conn, id)?));
            }

            let first_position = own
                .iter()
                .filter_map(|(_, file)| file.as_ref())
                .filter(|file| file.batch_id == chain.batch_id)
                .map(|file| file.position)
                .min();
            let mut plan: Vec<String> = match first_position {
                Some(position) => file_repo::list_pending_before(conn, &chain.batch_id, position)?
                    .into_iter()
                    .map(|file| file.id)
                    .collect(),
                None => Vec::new(),
            };

            for (id, file) in own {
                match file {
                    Some(file) if file.status != FileStatus::Pending.as_str() => {
                        debug!("File {} already {}, skipping", id, file.status);
                    }
                    _ => plan.push(id),
                }
            }
            Ok(plan)
        })?;
        Ok(plan)
    }

    fn run_exclusive(
        &self,
        chain: &BatchChain,
        reporter: &dyn ProgressReporter,
    ) -> Result<ChainResult> {
        let file_ids = self.plan(chain)?;

        let _span = info_span!("chain",
            batch_id = %chain.batch_id,
            files = file_ids.len(),
        )
        .entered();

        reporter.report(ImportProgressEvent::new(
            &chain.batch_id,
            ImportPhase::Queued,
            &format!("{} file(s) queued", file_ids.len()),
        ));

        let job = IngestionJob::new(&self.db, self.blobs.as_ref(), &self.readers)
            .with_flush_interval(self.flush_interval);
        let count = file_ids.len();
        let mut outcomes = Vec::with_capacity(count);

        for (index, file_id) in file_ids.iter().enumerate() {
            // The next file starts only once this call returned, whatever
            // happened to this one.
            match job.run(file_id, index + 1, count, reporter) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("File {} of batch {} could not be processed: {}", file_id, chain.batch_id, e);
                    self.record_failure(&chain.batch_id, file_id, &e.to_string());
                }
            }
        }

        let batch_status = self.batch_status(&chain.batch_id)?;
        let validation = if batch_status == BatchStatus::Completed {
            Some(
                self.suite
                    .validate_batch(&self.db, &chain.batch_id, reporter)
                    .map_err(|e| e.to_string()),
            )
        } else {
            info!(
                "Batch {} is {}, skipping validation",
                chain.batch_id, batch_status
            );
            None
        };

        Ok(ChainResult {
            batch_id: chain.batch_id.clone(),
            batch_status,
            outcomes,
            validation,
        })
    }

    fn record_failure(&self, batch_id: &str, file_id: &str, message: &str) {
        let recorded = self.db.with_transaction(|conn| -> std::result::Result<(), DatabaseError> {
            file_repo::mark_failed(conn, file_id, message)?;
            batch::mark_failed_in(conn, batch_id)
        });
        if let Err(e) = recorded {
            error!("Could not record failure of file {}: {}", file_id, e);
        }
    }

    fn batch_status(&self, batch_id: &str) -> Result<BatchStatus> {
        let batch = self
            .db
            .with_conn(|conn| batch_repo::find_by_id(conn, batch_id))?
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))?;
        Ok(BatchStatus::parse(&batch.status)?)
    }
}
