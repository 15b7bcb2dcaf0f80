//! Service layer for the tracker.
//!
//! This module contains the I/O-facing pieces:
//! - Search page fetching (`PageFetcher`)
//! - Clinic extraction (`PageParser`)
//! - Alert formatting and dispatch (`Alert`, `WebhookAlerter`)

mod alerts;
mod fetcher;
mod parser;

#[cfg(test)]
pub use alerts::RecordingAlerter;
pub use alerts::{Alert, AlertSink, LogAlerter, WebhookAlerter};
pub use fetcher::{PageFetcher, PageSource};
pub use parser::{AVAILABILITY_MARKER, PageParser};
