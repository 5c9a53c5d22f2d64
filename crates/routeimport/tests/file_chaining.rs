//! Multi-file submissions: strict per-batch ordering, failure handling and
//! the worker pool end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{csv, RowBuilder, TestHarness};
use routeimport::ingest::NoopProgress;
use routeimport::{
    BatchStatus, FileStatus, ImportError, ImportPhase, UploadError, UploadFile, UploadPolicy,
    ValidationStatus, WorkerPool,
};

fn rows(prefix: &str, count: usize) -> Vec<RowBuilder> {
    (0..count)
        .map(|i| {
            RowBuilder::new(&format!("{}{}", prefix, i))
                .run("R1", "1", "G1")
                .frequency("DAILY")
                .school("SCH1", "Lincoln")
        })
        .collect()
}

#[test]
fn test_files_run_one_after_another_in_position_order() {
    let harness = TestHarness::new().flush_interval(2);
    let batch = harness.create_batch("spring");

    let result = harness.import(
        &batch,
        vec![
            UploadFile::new("a.csv", csv(&rows("A", 5))),
            UploadFile::new("b.csv", csv(&rows("B", 3))),
            UploadFile::new("c.csv", csv(&rows("C", 4))),
        ],
    );
    assert!(result.succeeded(), "{:?}", result);
    assert_eq!(result.outcomes.len(), 3);

    let detail = harness.detail(&batch);
    let files = &detail.files;
    assert_eq!(
        files.iter().map(|f| f.position).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(
        files.iter().map(|f| f.processed_records).collect::<Vec<_>>(),
        vec![5, 3, 4]
    );
    for file in files {
        assert_eq!(file.status, FileStatus::Completed.as_str());
        assert_eq!(file.total_records, file.processed_records);
    }
    for pair in files.windows(2) {
        let finished = pair[0].completed_at.as_deref().unwrap();
        let started = pair[1].started_at.as_deref().unwrap();
        assert!(finished <= started, "{} overlaps {}", pair[0].id, pair[1].id);
    }

    assert_eq!(harness.route_run(&batch, "R1", "1").validation_details.total_records, 12);
}

#[test]
fn test_later_upload_appends_positions() {
    let harness = TestHarness::new();
    let batch = harness.create_batch("spring");

    harness.import(&batch, vec![UploadFile::new("a.csv", csv(&rows("A", 1)))]);
    let second = harness
        .upload(
            &batch,
            vec![
                UploadFile::new("b.csv", csv(&rows("B", 1))),
                UploadFile::new("c.csv", csv(&rows("C", 1))),
            ],
        )
        .unwrap();
    assert_eq!(second[0].position, 2);
    assert_eq!(second[1].position, 3);
    assert_eq!(
        harness.detail(&batch).batch.status,
        BatchStatus::Processing.as_str()
    );

    let results = harness.run_queued();
    assert_eq!(results.len(), 1);
    assert!(results[0].succeeded());
    assert_eq!(harness.students(&batch).len(), 3);
}

#[test]
fn test_failed_file_fails_batch_and_skips_validation() {
    let harness = TestHarness::new();
    let batch = harness.create_batch("spring");

    let result = harness.import(
        &batch,
        vec![
            UploadFile::new("good.csv", csv(&rows("A", 2))),
            UploadFile::new("broken.xlsx", b"not a workbook".to_vec()),
            UploadFile::new("later.csv", csv(&rows("C", 2))),
        ],
    );

    assert_eq!(result.batch_status, BatchStatus::Failed);
    assert!(result.validation.is_none());
    assert!(!result.succeeded());

    let detail = harness.detail(&batch);
    let statuses: Vec<&str> = detail.files.iter().map(|f| f.status.as_str()).collect();
    assert_eq!(statuses, vec!["completed", "failed", "completed"]);
    assert!(detail.files[1].error.is_some());
    assert_eq!(detail.batch.status, BatchStatus::Failed.as_str());
    assert_eq!(detail.batch.validation_status, ValidationStatus::NotRun.as_str());
    assert!(harness.route_runs(&batch).is_empty());

    let failures: Vec<_> = harness
        .progress
        .events()
        .into_iter()
        .filter(|e| e.phase == ImportPhase::Failed)
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.is_some());
}

#[test]
fn test_rejected_submission_stores_nothing() {
    let harness = TestHarness::with_policy(UploadPolicy {
        allowed_extensions: vec!["csv".to_string(), "xlsx".to_string()],
        max_upload_bytes: 64,
    });
    let batch = harness.create_batch("spring");

    let err = harness
        .upload(
            &batch,
            vec![
                UploadFile::new("ok.csv", b"student_id\nS1\n".to_vec()),
                UploadFile::new("legacy.xls", b"whatever".to_vec()),
            ],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ImportError::Upload(UploadError::UnsupportedType { .. })
    ));

    let err = harness
        .upload(&batch, vec![UploadFile::new("big.csv", vec![b'x'; 65])])
        .unwrap_err();
    assert!(matches!(err, ImportError::Upload(UploadError::TooLarge { .. })));

    let err = harness.upload(&batch, Vec::new()).unwrap_err();
    assert!(matches!(err, ImportError::Upload(UploadError::NoFiles)));

    let err = harness
        .upload("missing", vec![UploadFile::new("ok.csv", b"student_id\nS1\n".to_vec())])
        .unwrap_err();
    assert!(matches!(err, ImportError::Upload(UploadError::BatchNotFound(_))));

    let detail = harness.detail(&batch);
    assert!(detail.files.is_empty());
    assert_eq!(
        detail.batch.status,
        BatchStatus::WaitingForUpload.as_str()
    );
    assert!(harness.queue.take().is_empty());
}

#[test]
fn test_worker_pool_runs_uploaded_chain() {
    let harness = TestHarness::new();
    let batch = harness.create_batch("spring");
    harness
        .upload(
            &batch,
            vec![
                UploadFile::new("a.csv", csv(&rows("A", 3))),
                UploadFile::new("b.csv", csv(&rows("B", 2))),
            ],
        )
        .unwrap();
    let chain = harness.queue.take().remove(0);

    let pool = WorkerPool::new(Arc::new(harness.runner()), Arc::new(NoopProgress), 2);
    pool.submit(chain).unwrap();

    let mut result = None;
    for _ in 0..100 {
        if let Some(r) = pool.try_recv_result() {
            result = Some(r.unwrap());
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    pool.shutdown();
    pool.wait();

    let result = result.expect("chain did not finish");
    assert!(result.succeeded(), "{:?}", result);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(harness.students(&batch).len(), 5);
}

#[test]
fn test_separate_uploads_to_one_batch_never_overlap() {
    let harness = TestHarness::new().flush_interval(1);
    let batch = harness.create_batch("spring");
    harness
        .upload(&batch, vec![UploadFile::new("a.csv", csv(&rows("A", 300)))])
        .unwrap();
    harness
        .upload(&batch, vec![UploadFile::new("b.csv", csv(&rows("B", 300)))])
        .unwrap();
    let chains = harness.queue.take();
    assert_eq!(chains.len(), 2);

    let pool = WorkerPool::new(Arc::new(harness.runner()), Arc::new(NoopProgress), 2);
    for chain in chains {
        pool.submit(chain).unwrap();
    }

    let mut results = Vec::new();
    for _ in 0..400 {
        if let Some(r) = pool.try_recv_result() {
            results.push(r.unwrap());
            if results.len() == 2 {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    pool.shutdown();
    pool.wait();
    assert_eq!(results.len(), 2, "chains did not finish");

    let files = harness.detail(&batch).files;
    assert_eq!(files.len(), 2);
    for file in &files {
        assert_eq!(file.status, FileStatus::Completed.as_str());
        assert_eq!(file.processed_records, 300);
    }
    let finished = files[0].completed_at.as_deref().unwrap();
    let started = files[1].started_at.as_deref().unwrap();
    assert!(
        finished <= started,
        "position 2 started at {} before position 1 finished at {}",
        started,
        finished
    );
    assert_eq!(
        harness.route_run(&batch, "R1", "1").validation_details.total_records,
        600
    );
    assert_eq!(
        harness.detail(&batch).batch.status,
        BatchStatus::Completed.as_str()
    );
}
