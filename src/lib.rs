pub mod config;
pub mod constants;
pub mod error;
pub mod rank;
pub mod storage;
pub mod strategy;
pub mod types;

// Application layer: use cases and the ports they depend on
pub mod app;
// Adapters for the ports: reqwest, console output
pub mod infra;

pub mod observability;
