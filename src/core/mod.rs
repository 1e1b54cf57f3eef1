//! Language-agnostic domain model.
//!
//! Jobs, stage records, diagnostics and the structured stage outputs that
//! backends produce and the graph builder consumes.

pub mod types;
