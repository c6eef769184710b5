//! Queue consumer that performs the fetch for each job.
//!
//! Per delivery: wait out the simulated delay, fetch from the provider,
//! record RESOLVED/REJECTED, then ack on success or nack with requeue on
//! failure. A delivery is never acked unless its record was written.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::models::job::JobRecord;
use crate::services::policy::{self, DelayPolicy, RetryPolicy};
use crate::services::provider::ContentProvider;
use crate::services::queue::{self, Delivery, QueueClient, QueueError};
use crate::services::store::{ResultStore, StoreError};
use crate::shutdown::Shutdown;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Query passed to the provider for every job.
    pub query: String,
    pub delay: DelayPolicy,
    pub retry: RetryPolicy,
    /// Maximum deliveries handled at once by one processor.
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            query: "food".to_string(),
            delay: DelayPolicy::default(),
            retry: RetryPolicy::default(),
            concurrency: 16,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a single delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fetch succeeded; record RESOLVED and message acked.
    Resolved { result_url: String },
    /// Fetch failed; record REJECTED and message nacked.
    Rejected { requeued: bool },
    /// Shutdown arrived during the delay; message handed back untouched.
    Abandoned,
}

pub struct JobProcessor {
    store: Arc<dyn ResultStore>,
    queue: Arc<dyn QueueClient>,
    provider: Arc<dyn ContentProvider>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn ResultStore>,
        queue: Arc<dyn QueueClient>,
        provider: Arc<dyn ContentProvider>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            queue,
            provider,
            settings,
        }
    }

    /// Consume until `shutdown` fires, then wait for in-flight handlers.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let concurrency = self.settings.concurrency.clamp(1, policy::max_concurrency());
        let permits = Arc::new(Semaphore::new(concurrency));

        tracing::info!(
            concurrency = concurrency,
            max_attempts = ?self.settings.retry.max_attempts(),
            "Job processor started"
        );

        let processor = Arc::clone(&self);
        let handler_permits = Arc::clone(&permits);
        let handler_shutdown = shutdown.clone();
        queue::consume(
            Arc::clone(&self.queue),
            self.settings.poll_interval,
            shutdown,
            move |delivery| {
                let processor = Arc::clone(&processor);
                let permits = Arc::clone(&handler_permits);
                let shutdown = handler_shutdown.clone();
                async move {
                    let permit = tokio::select! {
                        permit = permits.acquire_owned() => permit,
                        _ = shutdown.triggered() => {
                            processor.give_back(&delivery).await;
                            return;
                        }
                    };
                    let Ok(permit) = permit else {
                        return;
                    };

                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_id = delivery.message.job_id;
                        if let Err(e) = processor.process(delivery, &shutdown).await {
                            tracing::error!(job_id = %job_id, error = %e, "Job processing failed");
                        }
                    });
                }
            },
        )
        .await;

        // Every handler holds a permit until it finishes.
        let in_flight = concurrency - permits.available_permits();
        if in_flight > 0 {
            tracing::info!(in_flight = in_flight, "Waiting for in-flight jobs");
        }
        // max_concurrency() keeps this within u32.
        let drained = permits
            .acquire_many(u32::try_from(concurrency).unwrap_or(u32::MAX))
            .await;
        drop(drained);

        tracing::info!("Job processor stopped");
    }

    /// Handle one delivery end to end.
    pub async fn process(
        &self,
        delivery: Delivery,
        shutdown: &Shutdown,
    ) -> Result<Outcome, ProcessError> {
        let job_id = delivery.message.job_id;
        let delay = self.settings.delay.sample(&mut rand::thread_rng());

        tracing::info!(
            job_id = %job_id,
            attempt = delivery.attempt,
            delay_secs = delay.as_secs(),
            "Processing job"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.triggered() => {
                tracing::info!(job_id = %job_id, "Shutdown during delay, returning job to queue");
                self.queue.nack(&delivery, true).await?;
                return Ok(Outcome::Abandoned);
            }
        }

        let start = Instant::now();
        let fetched = self.provider.fetch(&self.settings.query).await;
        metrics::histogram!("job_processing_seconds").record(start.elapsed().as_secs_f64());

        match fetched {
            Ok(result_url) => {
                self.record(&delivery, JobRecord::resolved(job_id, result_url.clone()))
                    .await?;
                self.queue.ack(&delivery).await?;
                metrics::counter!("jobs_resolved_total").increment(1);

                tracing::info!(job_id = %job_id, result_url = %result_url, "Job resolved");
                Ok(Outcome::Resolved { result_url })
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Fetch failed, rejecting job"
                );

                self.record(&delivery, JobRecord::rejected(job_id)).await?;

                let requeued = self.settings.retry.should_requeue(delivery.attempt);
                self.queue.nack(&delivery, requeued).await?;
                metrics::counter!("jobs_rejected_total").increment(1);

                if !requeued {
                    metrics::counter!("jobs_dropped_total").increment(1);
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = delivery.attempt,
                        "Job dropped after max attempts"
                    );
                }
                Ok(Outcome::Rejected { requeued })
            }
        }
    }

    /// Write the outcome; if that fails the message goes back for another
    /// attempt instead of being settled.
    async fn record(&self, delivery: &Delivery, record: JobRecord) -> Result<(), ProcessError> {
        if let Err(e) = self.store.upsert(&record).await {
            self.give_back(delivery).await;
            return Err(ProcessError::Store(e));
        }
        Ok(())
    }

    async fn give_back(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.nack(delivery, true).await {
            tracing::error!(
                job_id = %delivery.message.job_id,
                error = %e,
                "Failed to return job to queue; it stays in flight until recovered"
            );
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to record job outcome: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to settle delivery: {0}")]
    Queue(#[from] QueueError),
}
