//! Configuration system for the strata streaming engine.
//!
//! Provides runtime-configurable settings that persist to disk as RON files.
//! Unknown fields are ignored and missing fields fall back to defaults, so
//! config files stay forward and backward compatible across releases.

mod config;
mod error;

pub use config::{Config, LogConfig, StoreConfig, StreamingConfig};
pub use error::ConfigError;
