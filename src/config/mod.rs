//! Configuration and shared types
//!
//! Engine settings, startup validation, and the closed enums/error type
//! used across the crate.

pub mod settings;
pub mod types;
pub mod validator;
