pub mod backoff;
pub mod config;
pub mod error;
pub mod execution;
pub mod feeds;
pub mod models;
pub mod pipeline;
pub mod signals;
pub mod telemetry;
