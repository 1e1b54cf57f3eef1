//! compilebox: a multi-language compilation pipeline inspector
//! Runs each stage of a real toolchain (lex, parse, check, codegen, link,
//! execute) inside a resource-limited sandbox and turns every stage's output
//! into a structured, visualizable record.
//!
//! # Architecture
//!
//! ## Sandbox ([`sandbox`])
//! - [`sandbox::executor`]: one toolchain invocation per scratch directory, under limits
//! - [`sandbox::process`]: pre-exec controls, group termination, /proc sampling
//! - [`sandbox::inprocess`]: contract for embedded tools
//!
//! ## Language Backends ([`adapter`])
//! - [`adapter::languages`]: java, cpp, c, swift, brainfuck and go stage lists
//! - [`adapter::parse`]: turning raw stage output into tokens, trees, listings and traces
//! - [`adapter::registry`]: language to backend lookup
//!
//! ## Output Parsers ([`frontend`], [`tools`])
//! - [`frontend`]: readers for clang dumps, javap, Go assembly, IR and compiler diagnostics
//! - [`tools`]: embedded front ends (Brainfuck interpreter, C-family lexer)
//!
//! ## Pipeline ([`pipeline`])
//! - [`pipeline::manager`]: job submission, cancellation and lookup
//! - [`pipeline::job`]: requests, snapshots and per-job handles
//!
//! ## Results ([`graph`], [`cache`])
//! - [`graph::builder`]: stage records to a content-addressed visualization graph
//! - [`graph::export`]: JSON, DOT and text renderings
//! - [`cache`]: fingerprint-keyed result reuse with LRU eviction
//!
//! ## Surfaces ([`api`], [`cli`])
//! - [`api`]: transport-agnostic JSON API
//! - [`cli`]: `compilebox` command line
//!
//! ## Configuration & Observability ([`config`], [`observability`])
//! - [`config::settings`]: engine configuration file
//! - [`config::validator`]: startup validation
//! - [`observability::audit`]: structured pipeline events
//! - [`observability::metrics`]: Prometheus metrics export

// Shared domain model
pub mod core;

// Sandbox
pub mod sandbox;

// Language backends and output parsers
pub mod adapter;
pub mod frontend;
pub mod tools;

// Pipeline and results
pub mod cache;
pub mod graph;
pub mod pipeline;

// Surfaces
pub mod api;
pub mod cli;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use pipeline::{CompileRequest, JobSnapshot, Orchestrator};
