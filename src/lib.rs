//! Asynchronous job relay
//!
//! Jobs are submitted through the [`services::gateway::JobGateway`], which
//! records them as PENDING and publishes them to a durable queue. Workers
//! ([`services::processor::JobProcessor`]) consume the queue, fetch a result
//! URL from an image provider after a simulated delay, record the outcome and
//! acknowledge or requeue the message.

pub mod app_state;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
