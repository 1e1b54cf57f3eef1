//! Observability
//!
//! Structured audit events and Prometheus-style metrics for the pipeline.

pub mod audit;
pub mod metrics;
