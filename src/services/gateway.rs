use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::{sort_by_recency, JobRecord, QueueMessage};
use crate::services::queue::{QueueClient, QueueError};
use crate::services::store::{ResultStore, StoreError};

/// Entry point for new jobs and the read path over their records.
pub struct JobGateway {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn QueueClient>,
}

impl JobGateway {
    pub fn new(store: Arc<dyn ResultStore>, queue: Arc<dyn QueueClient>) -> Self {
        Self { store, queue }
    }

    /// Create a job: write its PENDING record, then publish it in the
    /// background. The id is only returned once the record is stored.
    pub async fn submit(&self) -> Result<Uuid, GatewayError> {
        let job_id = Uuid::new_v4();
        self.store.upsert(&JobRecord::pending(job_id)).await?;
        metrics::counter!("jobs_submitted_total").increment(1);

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            if let Err(e) = publish(queue.as_ref(), job_id).await {
                metrics::counter!("jobs_publish_failed_total").increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to add job to the queue; it will stay PENDING"
                );
            }
        });

        Ok(job_id)
    }

    pub async fn query(&self, job_id: Uuid) -> Result<Option<JobRecord>, GatewayError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Every known job, newest first.
    pub async fn query_all(&self) -> Result<Vec<JobRecord>, GatewayError> {
        let mut records = self.store.list().await?;
        sort_by_recency(&mut records);
        Ok(records)
    }
}

/// Publish a job's message. A failure leaves the job PENDING with nothing
/// queued; it is not retried here.
pub async fn publish(queue: &dyn QueueClient, job_id: Uuid) -> Result<(), QueueError> {
    queue.publish(&QueueMessage::new(job_id)).await?;
    tracing::info!(job_id = %job_id, "Job added to the queue");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
