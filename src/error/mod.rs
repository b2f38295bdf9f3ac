//! Error types for the session gate.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
