//! Integration test against live Redis and PostgreSQL.
//!
//! Requires REDIS_URL, DATABASE_URL and UNSPLASH_API_KEY in the environment.
//! Run with: cargo test --test integration_test -- --ignored

mod helpers;

use helpers::*;
use job_relay::{
    bootstrap,
    config::AppConfig,
    models::job::JobStatus,
    services::{gateway::JobGateway, processor::JobProcessor, queue::QueueClient},
    shutdown::Shutdown,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[ignore] // Requires running PostgreSQL and Redis
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let redis_url = config.redis_url.clone().expect("REDIS_URL must be set");
    assert!(config.database_url.is_some(), "DATABASE_URL must be set");

    let store = bootstrap::open_store(&config)
        .await
        .expect("Failed to open store");
    let queue_name = format!("jobQueue-test-{}", uuid::Uuid::new_v4());
    let queue = bootstrap::open_redis_queue(&redis_url, &queue_name)
        .await
        .expect("Failed to connect to queue");

    let gateway = JobGateway::new(Arc::clone(&store), Arc::clone(&queue));
    let provider = Arc::new(ScriptedProvider::failing_times(1));
    let processor = JobProcessor::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        provider.clone(),
        instant_settings(),
    );
    let shutdown = Shutdown::new();

    // 1. Submission writes PENDING and publishes
    let job_id = gateway.submit().await.expect("Failed to submit");
    let record = gateway.query(job_id).await.unwrap().expect("Job not found");
    assert_eq!(record.status, JobStatus::Pending);

    let delivery = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(delivery) = queue.receive().await.expect("receive failed") {
                return delivery;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Job was not published");
    assert_eq!(delivery.message.job_id, job_id);
    assert_eq!(delivery.attempt, 1);

    // 2. Failed fetch rejects and requeues
    processor.process(delivery, &shutdown).await.unwrap();
    let record = gateway.query(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Rejected);
    assert_eq!(queue.depth().await.unwrap(), 1);

    // 3. Redelivery resolves and acks
    let delivery = queue.receive().await.unwrap().expect("Job was not requeued");
    assert_eq!(delivery.attempt, 2);
    processor.process(delivery, &shutdown).await.unwrap();

    let record = gateway.query(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Resolved);
    assert_eq!(record.result_url, IMAGE_URL);
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert_eq!(queue.recover_in_flight().await.unwrap(), 0);
    assert_eq!(provider.calls(), 2);
}
