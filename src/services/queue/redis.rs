use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::{Delivery, QueueClient, QueueError};
use crate::models::job::QueueMessage;

/// How long a consumer stays alive without renewing its lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

// Settles a delivery only if it is still in this consumer's processing list.
// KEYS: processing, attempts, queue. ARGV: payload, job id, ack|requeue|drop.
const SETTLE_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
  return 0
end
if ARGV[3] == 'requeue' then
  redis.call('LPUSH', KEYS[3], ARGV[1])
else
  redis.call('HDEL', KEYS[2], ARGV[2])
end
return 1
";

/// Redis-backed reliable queue.
///
/// Messages are pushed onto `<name>` and moved atomically into the consumer's
/// own `<name>:processing:<consumer>` list while in flight. Each consumer
/// registers in `<name>:consumers` and keeps `<name>:lease:<consumer>` alive
/// from a heartbeat task; only lists whose lease has expired are recovered.
/// Delivery attempts are counted in the `<name>:attempts` hash. Durability
/// follows the Redis server's persistence settings (AOF recommended).
pub struct RedisQueue {
    client: ::redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    heartbeat: OnceLock<AbortHandle>,
    settle_script: ::redis::Script,
    lease: Lease,
    queue_key: String,
    processing_key: String,
    attempts_key: String,
}

/// A consumer's registration and liveness key.
#[derive(Debug, Clone)]
struct Lease {
    consumer_id: String,
    consumers_key: String,
    key: String,
    ttl: Duration,
}

impl Lease {
    async fn renew(&self, conn: &mut MultiplexedConnection) -> Result<(), QueueError> {
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);
        ::redis::pipe()
            .atomic()
            .sadd(&self.consumers_key, &self.consumer_id)
            .ignore()
            .pset_ex(&self.key, 1, ttl_ms)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }
}

impl RedisQueue {
    pub fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = ::redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        let consumer_id = Uuid::new_v4().to_string();
        Ok(Self {
            client,
            conn: OnceCell::new(),
            heartbeat: OnceLock::new(),
            settle_script: ::redis::Script::new(SETTLE_SCRIPT),
            processing_key: processing_key(queue_name, &consumer_id),
            lease: Lease {
                consumers_key: format!("{}:consumers", queue_name),
                key: lease_key(queue_name, &consumer_id),
                consumer_id,
                ttl: DEFAULT_LEASE_TTL,
            },
            queue_key: queue_name.to_string(),
            attempts_key: format!("{}:attempts", queue_name),
        })
    }

    /// Override the lease lifetime. The heartbeat renews it every third of
    /// that.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease.ttl = ttl.max(Duration::from_millis(3));
        self
    }

    pub fn consumer_id(&self) -> &str {
        &self.lease.consumer_id
    }

    /// Open the shared connection, register this consumer and start its
    /// heartbeat. Every other operation fails with
    /// [`QueueError::NotInitialized`] until this succeeds.
    pub async fn connect(&self) -> Result<(), QueueError> {
        self.conn
            .get_or_try_init(|| async {
                let mut conn = self.client.get_multiplexed_async_connection().await?;
                self.lease.renew(&mut conn).await?;

                let task = tokio::spawn(keep_alive(conn.clone(), self.lease.clone()));
                let _ = self.heartbeat.set(task.abort_handle());

                tracing::info!(
                    queue = %self.queue_key,
                    consumer = %self.lease.consumer_id,
                    "Connected to Redis job queue"
                );
                Ok::<_, QueueError>(conn)
            })
            .await?;
        Ok(())
    }

    fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        self.conn.get().cloned().ok_or(QueueError::NotInitialized)
    }

    async fn settle(&self, delivery: &Delivery, mode: &str) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let settled: i64 = self
            .settle_script
            .key(&self.processing_key)
            .key(&self.attempts_key)
            .key(&self.queue_key)
            .arg(delivery.receipt())
            .arg(delivery.message.job_id.to_string())
            .arg(mode)
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            return Err(QueueError::UnknownDelivery(
                delivery.message.job_id.to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for RedisQueue {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get() {
            heartbeat.abort();
        }
    }
}

fn processing_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:processing:{}", queue_name, consumer_id)
}

fn lease_key(queue_name: &str, consumer_id: &str) -> String {
    format!("{}:lease:{}", queue_name, consumer_id)
}

async fn keep_alive(mut conn: MultiplexedConnection, lease: Lease) {
    let mut ticker = tokio::time::interval(lease.ttl / 3);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = lease.renew(&mut conn).await {
            tracing::warn!(consumer = %lease.consumer_id, error = %e, "Failed to renew queue lease");
        }
    }
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let payload = serde_json::to_string(message)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn()?;
        let payload: Option<String> = conn
            .rpoplpush(&self.queue_key, &self.processing_key)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let message: QueueMessage = match serde_json::from_str(&payload) {
            Ok(message) => message,
            Err(e) => {
                // Unreadable payloads can never be processed; drop them.
                tracing::error!(payload = %payload, error = %e, "Dropping malformed queue message");
                conn.lrem::<_, _, ()>(&self.processing_key, 1, &payload)
                    .await?;
                return Err(QueueError::Serialize(e));
            }
        };

        let attempt: u32 = conn
            .hincr(&self.attempts_key, message.job_id.to_string(), 1)
            .await?;

        Ok(Some(Delivery::new(message, attempt, payload)))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, "ack").await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.settle(delivery, if requeue { "requeue" } else { "drop" })
            .await
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn()?;
        let consumers: Vec<String> = conn.smembers(&self.lease.consumers_key).await?;

        let mut moved = 0;
        for consumer in consumers {
            if consumer == self.lease.consumer_id {
                continue;
            }
            let alive: bool = conn.exists(lease_key(&self.queue_key, &consumer)).await?;
            if alive {
                continue;
            }

            let processing = processing_key(&self.queue_key, &consumer);
            loop {
                let payload: Option<String> = conn.rpoplpush(&processing, &self.queue_key).await?;
                if payload.is_none() {
                    break;
                }
                moved += 1;
            }
            conn.srem::<_, _, ()>(&self.lease.consumers_key, &consumer)
                .await?;
            tracing::info!(consumer = %consumer, "Recovered deliveries of expired consumer");
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn()?;
        let depth: u64 = conn.llen(&self.queue_key).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        ::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}
