//! Shared test doubles and fixtures for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use job_relay::services::{
    policy::{DelayPolicy, RetryPolicy},
    processor::{JobProcessor, ProcessorSettings},
    provider::{ContentProvider, ProviderError},
    queue::{Delivery, MemoryQueue, QueueClient},
    store::{FileResultStore, ResultStore},
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const IMAGE_URL: &str = "https://images.unsplash.com/photo-1504674900247?w=1080";

/// Provider that replays scripted outcomes, then succeeds with [`IMAGE_URL`].
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_times(failures: usize) -> Self {
        let provider = Self::default();
        for _ in 0..failures {
            provider.push(Err(ProviderError::Status(503)));
        }
        provider
    }

    pub fn push(&self, outcome: Result<String, ProviderError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn fetch(&self, _query: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(IMAGE_URL.to_string()))
    }
}

/// Store, queue and provider wired together the way the server does it.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<FileResultStore>,
    pub queue: Arc<MemoryQueue>,
    pub provider: Arc<ScriptedProvider>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(FileResultStore::new(dir.path().join("results.json")));
        Self {
            dir,
            store,
            queue: Arc::new(MemoryQueue::new()),
            provider: Arc::new(provider),
        }
    }

    pub fn store(&self) -> Arc<dyn ResultStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> Arc<dyn QueueClient> {
        self.queue.clone()
    }

    pub fn processor(&self, settings: ProcessorSettings) -> JobProcessor {
        JobProcessor::new(self.store(), self.queue(), self.provider.clone(), settings)
    }
}

/// Settings with no simulated latency.
pub fn instant_settings() -> ProcessorSettings {
    ProcessorSettings {
        query: "food".to_string(),
        delay: DelayPolicy::none(),
        retry: RetryPolicy::unbounded(),
        concurrency: 4,
        poll_interval: Duration::from_millis(10),
    }
}

/// Wait for the gateway's background publish to land and take the delivery.
pub async fn next_delivery(queue: &MemoryQueue) -> Delivery {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(delivery) = queue.receive().await.expect("receive") {
                return delivery;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message was published")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
