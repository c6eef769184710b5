//! Job lifecycle tests: gateway → store → queue → processor, over the file
//! store and in-process queue.

mod helpers;

use helpers::*;
use job_relay::models::job::{JobRecord, JobStatus, QueueMessage};
use job_relay::services::{
    gateway::{self, JobGateway},
    policy::{DelayPolicy, RetryPolicy},
    processor::{Outcome, ProcessError, ProcessorSettings},
    queue::{QueueClient, QueueError, RedisQueue},
    store::ResultStore,
};
use job_relay::shutdown::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

#[tokio::test]
async fn test_submitted_job_is_immediately_pending() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());

    let job_id = assert_ok!(gateway.submit().await);
    let record = gateway.query(job_id).await.unwrap().expect("record exists");

    assert_eq!(record.job_id, job_id);
    assert_eq!(record.status, JobStatus::Pending);
    assert!(record.result_url.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());

    assert!(gateway.query(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_then_resolved_on_redelivery() {
    let harness = Harness::new(ScriptedProvider::failing_times(1));
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(instant_settings());
    let shutdown = Shutdown::new();

    let job_id = gateway.submit().await.unwrap();
    assert_eq!(
        gateway.query(job_id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );

    // First attempt: provider fails.
    let delivery = next_delivery(&harness.queue).await;
    assert_eq!(delivery.message.job_id, job_id);
    assert_eq!(delivery.attempt, 1);
    let outcome = processor.process(delivery, &shutdown).await.unwrap();
    assert_eq!(outcome, Outcome::Rejected { requeued: true });

    let record = gateway.query(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Rejected);
    assert_eq!(record.result_url, "");

    // Redelivery succeeds.
    let delivery = next_delivery(&harness.queue).await;
    assert_eq!(delivery.attempt, 2);
    let outcome = processor.process(delivery, &shutdown).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Resolved {
            result_url: IMAGE_URL.to_string()
        }
    );

    let record = gateway.query(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Resolved);
    assert_eq!(record.result_url, IMAGE_URL);
    assert_eq!(gateway.query_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_resolved_message_is_acked_once() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(instant_settings());

    gateway.submit().await.unwrap();
    let delivery = next_delivery(&harness.queue).await;
    processor.process(delivery, &Shutdown::new()).await.unwrap();

    assert_eq!(harness.queue.in_flight().await, 0);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert!(harness.queue.receive().await.unwrap().is_none());
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test]
async fn test_recovery_by_another_worker_skips_held_delivery() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(instant_settings());

    let job_id = gateway.submit().await.unwrap();
    let delivery = next_delivery(&harness.queue).await;

    // A second worker starting up while the first still holds the message.
    assert_eq!(harness.queue.recover_in_flight().await.unwrap(), 0);

    let outcome = processor.process(delivery, &Shutdown::new()).await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Resolved {
            result_url: IMAGE_URL.to_string()
        }
    );

    // Acked, and nothing left to redeliver.
    assert_eq!(harness.queue.in_flight().await, 0);
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
    assert_eq!(harness.queue.recover_in_flight().await.unwrap(), 0);
    assert!(harness.queue.receive().await.unwrap().is_none());

    let record = gateway.query(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Resolved);
}

#[tokio::test]
async fn test_repeated_failures_never_duplicate_records() {
    let harness = Harness::new(ScriptedProvider::failing_times(5));
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(instant_settings());
    let shutdown = Shutdown::new();

    let job_id = gateway.submit().await.unwrap();
    for attempt in 1..=5 {
        let delivery = next_delivery(&harness.queue).await;
        assert_eq!(delivery.attempt, attempt);
        let outcome = processor.process(delivery, &shutdown).await.unwrap();
        assert_eq!(outcome, Outcome::Rejected { requeued: true });
    }

    let records = gateway.query_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, job_id);
    assert_eq!(records[0].status, JobStatus::Rejected);

    // Still eligible for redelivery.
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_bound_drops_message() {
    let harness = Harness::new(ScriptedProvider::failing_times(5));
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(ProcessorSettings {
        retry: RetryPolicy::bounded(2).unwrap(),
        ..instant_settings()
    });
    let shutdown = Shutdown::new();

    let job_id = gateway.submit().await.unwrap();

    let first = next_delivery(&harness.queue).await;
    assert_eq!(
        processor.process(first, &shutdown).await.unwrap(),
        Outcome::Rejected { requeued: true }
    );

    let second = next_delivery(&harness.queue).await;
    assert_eq!(
        processor.process(second, &shutdown).await.unwrap(),
        Outcome::Rejected { requeued: false }
    );

    assert!(harness.queue.receive().await.unwrap().is_none());
    assert_eq!(harness.queue.in_flight().await, 0);
    assert_eq!(
        gateway.query(job_id).await.unwrap().unwrap().status,
        JobStatus::Rejected
    );
}

#[tokio::test]
async fn test_upsert_same_job_keeps_latest_write() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let job_id = Uuid::new_v4();

    harness.store.upsert(&JobRecord::rejected(job_id)).await.unwrap();
    harness
        .store
        .upsert(&JobRecord::resolved(job_id, IMAGE_URL))
        .await
        .unwrap();

    let records = harness.store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobStatus::Resolved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_all_listed() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = Arc::new(JobGateway::new(harness.store(), harness.queue()));

    let submissions = (0..10).map(|_| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.submit().await }
    });
    let mut ids: Vec<Uuid> = futures::future::join_all(submissions)
        .await
        .into_iter()
        .map(|r| r.expect("submit"))
        .collect();

    let records = gateway.query_all().await.unwrap();
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|r| r.status == JobStatus::Pending));

    let mut listed: Vec<Uuid> = records.iter().map(|r| r.job_id).collect();
    ids.sort();
    listed.sort();
    assert_eq!(ids, listed);

    // Newest first.
    assert!(records
        .windows(2)
        .all(|pair| pair[0].updated_at >= pair[1].updated_at));
}

#[tokio::test]
async fn test_publish_failure_leaves_job_pending() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    // Never connected, so every publish fails.
    let queue: Arc<dyn QueueClient> =
        Arc::new(RedisQueue::new("redis://127.0.0.1:6379", "jobQueue").unwrap());
    let gateway = JobGateway::new(harness.store(), Arc::clone(&queue));

    let job_id = assert_ok!(gateway.submit().await);
    assert_eq!(
        gateway.query(job_id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );

    let err = assert_err!(gateway::publish(queue.as_ref(), job_id).await);
    assert!(matches!(err, QueueError::NotInitialized));
}

#[tokio::test]
async fn test_submit_fails_without_id_on_corrupt_store() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    std::fs::write(harness.store.path(), b"not json").unwrap();
    let gateway = JobGateway::new(harness.store(), harness.queue());

    assert_err!(gateway.submit().await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_failure_never_acks() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let processor = harness.processor(instant_settings());

    harness
        .queue
        .publish(&QueueMessage::new(Uuid::new_v4()))
        .await
        .unwrap();
    let delivery = harness.queue.receive().await.unwrap().unwrap();
    std::fs::write(harness.store.path(), b"{ broken").unwrap();

    let err = processor
        .process(delivery, &Shutdown::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Store(_)));

    // Handed back rather than settled.
    assert_eq!(harness.queue.in_flight().await, 0);
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn test_shutdown_during_delay_returns_message_without_write() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = harness.processor(ProcessorSettings {
        delay: DelayPolicy::fixed(Duration::from_secs(60)),
        ..instant_settings()
    });
    let shutdown = Shutdown::new();

    let job_id = gateway.submit().await.unwrap();
    let delivery = next_delivery(&harness.queue).await;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), processor.process(delivery, &shutdown))
        .await
        .expect("delay interrupted")
        .unwrap();

    assert_eq!(outcome, Outcome::Abandoned);
    assert_eq!(harness.provider.calls(), 0);
    assert_eq!(
        gateway.query(job_id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
    assert_eq!(harness.queue.depth().await.unwrap(), 1);
    assert_eq!(harness.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_delay_is_applied_before_fetch() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let processor = harness.processor(ProcessorSettings {
        delay: DelayPolicy::fixed(Duration::from_millis(150)),
        ..instant_settings()
    });

    harness
        .queue
        .publish(&QueueMessage::new(Uuid::new_v4()))
        .await
        .unwrap();
    let delivery = harness.queue.receive().await.unwrap().unwrap();

    let start = Instant::now();
    processor.process(delivery, &Shutdown::new()).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_loop_resolves_jobs_concurrently() {
    let harness = Harness::new(ScriptedProvider::succeeding());
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = Arc::new(harness.processor(ProcessorSettings {
        delay: DelayPolicy::fixed(Duration::from_millis(500)),
        concurrency: 4,
        ..instant_settings()
    }));
    let shutdown = Shutdown::new();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(gateway.submit().await.unwrap());
    }

    let start = Instant::now();
    let worker = tokio::spawn(Arc::clone(&processor).run(shutdown.clone()));

    let store = harness.store();
    eventually(|| {
        let store = Arc::clone(&store);
        async move {
            let records = store.list().await.unwrap();
            records.len() == 4 && records.iter().all(|r| r.status == JobStatus::Resolved)
        }
    })
    .await;

    // Four 500ms delays in sequence would take two seconds.
    assert!(start.elapsed() < Duration::from_millis(1500));

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("processor stopped")
        .unwrap();

    assert_eq!(harness.queue.in_flight().await, 0);
    assert_eq!(harness.provider.calls(), 4);
    for id in ids {
        let record = harness.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.result_url, IMAGE_URL);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_loop_requeues_until_success() {
    let harness = Harness::new(ScriptedProvider::failing_times(3));
    let gateway = JobGateway::new(harness.store(), harness.queue());
    let processor = Arc::new(harness.processor(instant_settings()));
    let shutdown = Shutdown::new();

    let job_id = gateway.submit().await.unwrap();
    let worker = tokio::spawn(Arc::clone(&processor).run(shutdown.clone()));

    let store = harness.store();
    eventually(|| {
        let store = Arc::clone(&store);
        async move {
            matches!(
                store.get(job_id).await.unwrap(),
                Some(record) if record.status == JobStatus::Resolved
            )
        }
    })
    .await;

    shutdown.trigger();
    worker.await.unwrap();

    assert_eq!(harness.provider.calls(), 4);
    assert_eq!(harness.store.list().await.unwrap().len(), 1);
    assert!(harness.queue.receive().await.unwrap().is_none());
}
