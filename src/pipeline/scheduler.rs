// src/pipeline/scheduler.rs

//! Polling loop.

use std::error::Error as StdError;
use std::time::Duration;

use chrono::Utc;

use crate::error::Result;
use crate::pipeline::{ReconcileReport, Reconciler};
use crate::services::{PageParser, PageSource};

/// Drives fetch → parse → reconcile on a fixed interval.
pub struct Tracker<'a> {
    source: Box<dyn PageSource>,
    parser: PageParser,
    reconciler: Reconciler<'a>,
    sleep_interval: Duration,
}

impl<'a> Tracker<'a> {
    pub fn new(
        source: Box<dyn PageSource>,
        parser: PageParser,
        reconciler: Reconciler<'a>,
        sleep_interval: Duration,
    ) -> Self {
        Self {
            source,
            parser,
            reconciler,
            sleep_interval,
        }
    }

    /// One poll, with errors propagated to the caller.
    pub async fn run_cycle(&self) -> Result<ReconcileReport> {
        let content = self.source.fetch().await?;
        let snapshots = self.parser.parse_bytes(&content);
        if snapshots.is_empty() {
            log::warn!("No clinics found on the search page");
        } else {
            log::info!("Parsed {} clinics from the search page", snapshots.len());
        }

        for snapshot in &snapshots {
            log::debug!(
                "{}: {} available ({})",
                snapshot.name,
                snapshot.available_count,
                snapshot.detail_href.as_deref().unwrap_or("no link")
            );
        }

        self.reconciler.reconcile(&snapshots, Utc::now()).await
    }

    /// One poll with every error logged instead of returned.
    pub async fn tick(&self) -> Option<ReconcileReport> {
        match self.run_cycle().await {
            Ok(report) => {
                log::info!(
                    "Poll complete: {} clinics, {} up, {} down, {} removed, {} failed alerts",
                    report.seen,
                    report.up_alerts,
                    report.down_alerts,
                    report.removals,
                    report.failed_alerts
                );
                Some(report)
            }
            Err(e) => {
                log::error!("Failed attempt! {}", error_chain(&e));
                None
            }
        }
    }

    /// Poll forever. A failed poll waits the same interval as a good one.
    pub async fn run(&self) {
        loop {
            self.tick().await;
            log::info!("Sleeping {} seconds", self.sleep_interval.as_secs());
            tokio::time::sleep(self.sleep_interval).await;
        }
    }
}

/// Render an error with all of its sources.
///
/// A cause already quoted by its parent's message is not repeated.
pub fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !out.ends_with(&message) {
            out.push_str(": ");
            out.push_str(&message);
        }
        source = cause.source();
    }
    out
}
