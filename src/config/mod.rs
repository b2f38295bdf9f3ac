//! Configuration module for the session gate.
//!
//! Handles loading and validating configuration from TOML files.

mod settings;

pub use settings::*;
