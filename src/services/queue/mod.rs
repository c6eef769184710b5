//! Durable, acknowledgable work queue.
//!
//! Delivery is at-least-once: a message taken with [`QueueClient::receive`]
//! is owned by the consumer that took it until it is settled with
//! [`QueueClient::ack`] or [`QueueClient::nack`]. Messages stranded in flight
//! by a consumer that is gone are returned with
//! [`QueueClient::recover_in_flight`]; deliveries of live consumers are never
//! touched, so an acked message is never seen again.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::models::job::QueueMessage;
use crate::shutdown::Shutdown;

pub use self::memory::MemoryQueue;
pub use self::redis::RedisQueue;

/// A message handed to a consumer, plus what the broker needs to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: QueueMessage,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    receipt: String,
    // Held by every clone; an in-process broker treats the delivery as
    // abandoned once the last clone is dropped unsettled.
    holder: Option<Arc<()>>,
}

impl Delivery {
    pub(crate) fn new(message: QueueMessage, attempt: u32, receipt: String) -> Self {
        Self {
            message,
            attempt,
            receipt,
            holder: None,
        }
    }

    /// A delivery whose liveness the broker can observe through the returned
    /// weak handle.
    pub(crate) fn tracked(message: QueueMessage, attempt: u32, receipt: String) -> (Self, Weak<()>) {
        let holder = Arc::new(());
        let watch = Arc::downgrade(&holder);
        let delivery = Self {
            message,
            attempt,
            receipt,
            holder: Some(holder),
        };
        (delivery, watch)
    }

    pub(crate) fn receipt(&self) -> &str {
        &self.receipt
    }
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue a message durably.
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Take the next message into flight. `Ok(None)` when the queue is empty.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Settle a delivery as processed; it is never redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Settle a delivery as failed. With `requeue` the message goes back to
    /// the tail of the queue, otherwise it is dropped.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Return messages held by consumers that are no longer alive to the
    /// queue. Returns how many moved.
    async fn recover_in_flight(&self) -> Result<u64, QueueError>;

    /// Number of messages waiting for delivery.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Drive `handler` once per delivered message until `shutdown` fires.
///
/// The handler owns settling the delivery. An empty queue or a broker error
/// backs off for `poll_interval` before the next receive.
pub async fn consume<H, Fut>(
    queue: Arc<dyn QueueClient>,
    poll_interval: Duration,
    shutdown: Shutdown,
    mut handler: H,
) where
    H: FnMut(Delivery) -> Fut,
    Fut: Future<Output = ()>,
{
    while !shutdown.is_triggered() {
        let idle = match queue.receive().await {
            Ok(Some(delivery)) => {
                tracing::debug!(
                    job_id = %delivery.message.job_id,
                    attempt = delivery.attempt,
                    "Message delivered"
                );
                handler(delivery).await;
                false
            }
            Ok(None) => {
                tracing::trace!("Queue empty, sleeping");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to receive from queue, will retry");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.triggered() => {}
            }
        }
    }

    tracing::info!("Consume loop stopped");
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue connection is not initialized; call connect() first")]
    NotInitialized,

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Delivery is not in flight: {0}")]
    UnknownDelivery(String),
}
