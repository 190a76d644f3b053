//! Integration tests for the durable job tracker.
//!
//! Run with a migrated database:
//! `DATABASE_URL=postgres://... cargo test -p studiora-db -- --ignored`

use serde_json::json;
use studiora_core::{JobStatus, JobStore, JobType, ListJobsRequest};
use studiora_db::test_fixtures::TestDatabase;

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn job_lifecycle_happy_path() {
    let test_db = TestDatabase::new().await;
    let tenant = test_db.tenant();

    let job_id = test_db
        .db
        .jobs
        .create(tenant, JobType::MaterialUpload, json!({"material_id": "m1"}))
        .await
        .expect("create");

    let job = test_db
        .db
        .jobs
        .get(tenant, job_id)
        .await
        .expect("get")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress_percent, 0);
    assert!(job.started_at.is_none());

    test_db
        .db
        .jobs
        .mark_started(tenant, job_id)
        .await
        .expect("mark_started");
    test_db
        .db
        .jobs
        .update_progress(tenant, job_id, 40, Some(json!({"pages": 7})))
        .await
        .expect("progress");
    test_db
        .db
        .jobs
        .complete(tenant, job_id, json!({"chunks": 12}))
        .await
        .expect("complete");

    let job = test_db
        .db
        .jobs
        .get(tenant, job_id)
        .await
        .expect("get")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.result, Some(json!({"chunks": 12})));
    assert!(job.completed_at.is_some());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn terminal_state_is_final() {
    let test_db = TestDatabase::new().await;
    let tenant = test_db.tenant();

    let job_id = test_db
        .db
        .jobs
        .create(tenant, JobType::LessonGeneration, json!({}))
        .await
        .expect("create");
    test_db
        .db
        .jobs
        .complete(tenant, job_id, json!({"winner": true}))
        .await
        .expect("complete");

    // A stale worker finishing late must not overwrite the outcome,
    // whichever terminal write it attempts.
    test_db
        .db
        .jobs
        .complete(tenant, job_id, json!({"winner": false}))
        .await
        .expect("second complete is a no-op");
    test_db
        .db
        .jobs
        .fail(tenant, job_id, "late failure")
        .await
        .expect("fail is a no-op");
    test_db
        .db
        .jobs
        .update_progress(tenant, job_id, 10, None)
        .await
        .expect("progress is a no-op");

    let job = test_db
        .db
        .jobs
        .get(tenant, job_id)
        .await
        .expect("get")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"winner": true})));
    assert_eq!(job.progress_percent, 100);
    assert!(job.error_message.is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn progress_is_monotone_and_metadata_merges() {
    let test_db = TestDatabase::new().await;
    let tenant = test_db.tenant();

    let job_id = test_db
        .db
        .jobs
        .create(tenant, JobType::MaterialUpload, json!({}))
        .await
        .expect("create");
    test_db
        .db
        .jobs
        .mark_started(tenant, job_id)
        .await
        .expect("start");

    test_db
        .db
        .jobs
        .update_progress(tenant, job_id, 60, Some(json!({"phase": "chunking"})))
        .await
        .expect("progress 60");
    // Out-of-order delivery: the lower value must not win.
    test_db
        .db
        .jobs
        .update_progress(tenant, job_id, 30, Some(json!({"pages": 4})))
        .await
        .expect("progress 30");

    let job = test_db
        .db
        .jobs
        .get(tenant, job_id)
        .await
        .expect("get")
        .expect("job exists");
    assert_eq!(job.progress_percent, 60);
    let meta = job.progress_metadata.expect("metadata");
    assert_eq!(meta["phase"], "chunking");
    assert_eq!(meta["pages"], 4);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn list_filters_and_orders_newest_first() {
    let test_db = TestDatabase::new().await;
    let tenant = test_db.tenant();

    let first = test_db
        .db
        .jobs
        .create(tenant, JobType::MaterialUpload, json!({}))
        .await
        .expect("create");
    let second = test_db
        .db
        .jobs
        .create(tenant, JobType::LessonGeneration, json!({}))
        .await
        .expect("create");
    test_db
        .db
        .jobs
        .fail(tenant, second, "boom")
        .await
        .expect("fail");

    let all = test_db
        .db
        .jobs
        .list(tenant, ListJobsRequest::default())
        .await
        .expect("list");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second);
    assert_eq!(all[1].id, first);

    let failed = test_db
        .db
        .jobs
        .list(
            tenant,
            ListJobsRequest {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
        )
        .await
        .expect("list failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, second);

    let uploads = test_db
        .db
        .jobs
        .list(
            tenant,
            ListJobsRequest {
                job_type: Some(JobType::MaterialUpload),
                ..Default::default()
            },
        )
        .await
        .expect("list uploads");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].id, first);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn poll_many_omits_foreign_and_unknown_ids() {
    let test_db = TestDatabase::new().await;
    let tenant_a = test_db.tenant();
    let tenant_b = test_db.tenant();

    let mine = test_db
        .db
        .jobs
        .create(tenant_a, JobType::CheckInEvaluation, json!({}))
        .await
        .expect("create");
    let theirs = test_db
        .db
        .jobs
        .create(tenant_b, JobType::CheckInEvaluation, json!({}))
        .await
        .expect("create");
    let unknown = uuid::Uuid::new_v4();

    let snapshots = test_db
        .db
        .jobs
        .poll_many(tenant_a, &[mine, theirs, unknown])
        .await
        .expect("poll_many");

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].id, mine);
    assert_eq!(snapshots[0].status, JobStatus::Queued);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn cross_tenant_get_returns_none() {
    let test_db = TestDatabase::new().await;
    let tenant_a = test_db.tenant();
    let tenant_b = test_db.tenant();

    let job_id = test_db
        .db
        .jobs
        .create(tenant_a, JobType::MaterialUpload, json!({}))
        .await
        .expect("create");

    // Exact id in hand, wrong tenant: indistinguishable from not-found.
    let stolen = test_db
        .db
        .jobs
        .get(tenant_b, job_id)
        .await
        .expect("get");
    assert!(stolen.is_none());

    // And a cross-tenant write must not stick.
    test_db
        .db
        .jobs
        .fail(tenant_b, job_id, "hijack")
        .await
        .expect("no-op");
    let job = test_db
        .db
        .jobs
        .get(tenant_a, job_id)
        .await
        .expect("get")
        .expect("job exists");
    assert_eq!(job.status, JobStatus::Queued);

    test_db.cleanup().await;
}
