// src/models/mod.rs

//! Domain models for the tracker.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod entry;
mod snapshot;

// Re-export all public types
pub use config::{
    AlertConfig, CacheBackendKind, CacheConfig, Config, CountRefresh, MAX_ALERT_INTERVAL_MINUTES,
    PolicyConfig, RetryConfig, SchedulerConfig, SourceConfig,
};
pub use entry::{CacheEntry, RECORD_VERSION};
pub use snapshot::EntitySnapshot;
