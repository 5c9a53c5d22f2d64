use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::{Result, WorkerError};
use crate::ingest::ProgressReporter;
use crate::worker::chain::{BatchChain, ChainQueue, ChainResult, ChainRunner};

/// Threads that take whole chains off a queue.
///
/// One chain is owned by one worker from start to finish. The runner keeps
/// chains of the same batch from overlapping, so a batch's files are
/// ingested one at a time while different batches run side by side.
pub struct WorkerPool {
    chain_sender: Sender<BatchChain>,
    result_receiver: Receiver<Result<ChainResult>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(
        runner: Arc<ChainRunner>,
        reporter: Arc<dyn ProgressReporter>,
        worker_count: usize,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (chain_sender, chain_receiver) = bounded::<BatchChain>(worker_count * 2);
        // Results wait here until the caller drains them.
        let (result_sender, result_receiver) = unbounded::<Result<ChainResult>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let chain_rx = chain_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);
            let worker_reporter = Arc::clone(&reporter);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    chain_rx,
                    result_tx,
                    shutdown_flag,
                    worker_runner,
                    worker_reporter,
                );
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            chain_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, chain: BatchChain) -> std::result::Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }
        if chain.file_ids.is_empty() {
            return Err(WorkerError::EmptyChain(chain.batch_id));
        }

        self.chain_sender
            .send(chain)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<Result<ChainResult>> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<Result<ChainResult>> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Lets queued chains finish, then joins every worker.
    pub fn wait(self) {
        drop(self.chain_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl ChainQueue for WorkerPool {
    fn enqueue(&self, chain: BatchChain) -> std::result::Result<(), WorkerError> {
        self.submit(chain)
    }
}

fn run_worker(
    worker_id: usize,
    chain_receiver: Receiver<BatchChain>,
    result_sender: Sender<Result<ChainResult>>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<ChainRunner>,
    reporter: Arc<dyn ProgressReporter>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match chain_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(chain) => {
                debug!(
                    "Worker {} processing batch {} ({} files)",
                    worker_id,
                    chain.batch_id,
                    chain.file_ids.len()
                );

                let result = runner.run(&chain, reporter.as_ref());

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} chain channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchManager, BatchStatus};
    use crate::db::{batch_repo, Database};
    use crate::ingest::NoopProgress;
    use crate::storage::FileSystemBlobStore;
    use tempfile::TempDir;

    fn pool(temp: &TempDir, db: &Database, workers: usize) -> WorkerPool {
        let runner = ChainRunner::new(db.clone(), Arc::new(FileSystemBlobStore::new(temp.path())));
        WorkerPool::new(Arc::new(runner), Arc::new(NoopProgress), workers)
    }

    #[test]
    fn test_worker_pool_creation() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let pool = pool(&temp, &db, 2);

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.submit(BatchChain::new("b", vec!["f".to_string()])),
            Err(WorkerError::ChannelClosed)
        ));

        pool.wait();
    }

    #[test]
    fn test_submit_rejects_empty_chain() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let pool = pool(&temp, &db, 1);

        assert!(matches!(
            pool.enqueue(BatchChain::new("b", vec![])),
            Err(WorkerError::EmptyChain(_))
        ));
        pool.wait();
    }

    #[test]
    fn test_submit_and_receive_result() {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let batch_id = BatchManager::new(db.clone()).create_batch("b", None).unwrap().id;
        db.with_conn(|conn| batch_repo::set_status(conn, &batch_id, "processing", None))
            .unwrap();
        let pool = pool(&temp, &db, 2);

        // The file was never attached, so the batch fails.
        pool.submit(BatchChain::new(&batch_id, vec!["missing".to_string()]))
            .unwrap();

        let result = pool.recv_result().unwrap().unwrap();
        assert_eq!(result.batch_id, batch_id);
        assert_eq!(result.batch_status, BatchStatus::Failed);
        assert!(result.validation.is_none());

        pool.wait();
    }
}
