use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Weak;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Delivery, QueueClient, QueueError};
use crate::models::job::QueueMessage;

/// In-process queue with the same settle semantics as the Redis backend.
///
/// Not durable across restarts. Used for single-process development runs and
/// tests. A delivery counts as abandoned once every clone of it has been
/// dropped without being settled; only those are recovered.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
}

struct InFlight {
    message: QueueMessage,
    holder: Weak<()>,
}

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<u64, InFlight>,
    attempts: HashMap<Uuid, u32>,
    next_tag: u64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivered but unsettled messages.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn tag_of(delivery: &Delivery) -> Result<u64, QueueError> {
        delivery
            .receipt()
            .parse()
            .map_err(|_| QueueError::UnknownDelivery(delivery.receipt().to_string()))
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.state.lock().await.ready.push_back(message.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };

        let tag = state.next_tag;
        state.next_tag += 1;

        let attempt = state.attempts.entry(message.job_id).or_insert(0);
        *attempt += 1;
        let attempt = *attempt;

        let (delivery, holder) = Delivery::tracked(message.clone(), attempt, tag.to_string());
        state.in_flight.insert(tag, InFlight { message, holder });
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let tag = Self::tag_of(delivery)?;
        let mut state = self.state.lock().await;
        let entry = state
            .in_flight
            .remove(&tag)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt().to_string()))?;
        state.attempts.remove(&entry.message.job_id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let tag = Self::tag_of(delivery)?;
        let mut state = self.state.lock().await;
        let entry = state
            .in_flight
            .remove(&tag)
            .ok_or_else(|| QueueError::UnknownDelivery(delivery.receipt().to_string()))?;

        if requeue {
            state.ready.push_back(entry.message);
        } else {
            state.attempts.remove(&entry.message.job_id);
        }
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let mut state = self.state.lock().await;
        let mut abandoned: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.holder.strong_count() == 0)
            .map(|(tag, _)| *tag)
            .collect();
        abandoned.sort_unstable();

        let mut moved = 0;
        for tag in abandoned {
            if let Some(entry) = state.in_flight.remove(&tag) {
                state.ready.push_back(entry.message);
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.ready.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
