pub mod gateway;
pub mod policy;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod store;
