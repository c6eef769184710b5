use std::sync::Arc;

use crate::services::{gateway::JobGateway, queue::QueueClient, store::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<JobGateway>,
    pub store: Arc<dyn ResultStore>,
    pub queue: Arc<dyn QueueClient>,
}

impl AppState {
    pub fn new(store: Arc<dyn ResultStore>, queue: Arc<dyn QueueClient>) -> Self {
        Self {
            gateway: Arc::new(JobGateway::new(Arc::clone(&store), Arc::clone(&queue))),
            store,
            queue,
        }
    }
}
