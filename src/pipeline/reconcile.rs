// src/pipeline/reconcile.rs

//! Threshold, cooldown and removal logic.
//!
//! Each poll walks the parsed snapshots against the cache:
//!
//! - **Up**: count ≥ up threshold and the up cooldown has elapsed.
//! - **Down** (only if up did not fire): count ≤ down threshold, the cached
//!   count was above it, and the down cooldown has elapsed.
//! - **Removed**: cached clinics missing from this poll.
//!
//! Cache entries change only after the matching alert was delivered, so a
//! failed send is retried on the next poll.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{CacheEntry, CountRefresh, EntitySnapshot, PolicyConfig};
use crate::services::{Alert, AlertSink};
use crate::storage::CacheStore;
use crate::utils;

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub seen: usize,
    pub up_alerts: usize,
    pub down_alerts: usize,
    pub removals: usize,
    pub failed_alerts: usize,
    pub refreshed: usize,
    pub cache_errors: usize,
}

impl ReconcileReport {
    pub fn alerts_sent(&self) -> usize {
        self.up_alerts + self.down_alerts + self.removals
    }
}

/// Applies the alert policy to one poll's snapshots.
pub struct Reconciler<'a> {
    store: CacheStore,
    alerts: Box<dyn AlertSink>,
    policy: &'a PolicyConfig,
    base_url: String,
    search_url: String,
}

impl<'a> Reconciler<'a> {
    /// `base_url` resolves relative clinic links; `search_url` stands in
    /// when a clinic has no link.
    pub fn new(
        store: CacheStore,
        alerts: Box<dyn AlertSink>,
        policy: &'a PolicyConfig,
        base_url: impl Into<String>,
        search_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            alerts,
            policy,
            base_url: base_url.into(),
            search_url: search_url.into(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Reconcile one poll. `now` is shared by every decision in the pass.
    ///
    /// Only a failure to list cached names aborts the pass; per-clinic
    /// failures are logged and counted.
    pub async fn reconcile(
        &self,
        snapshots: &[EntitySnapshot],
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let mut unseen: HashSet<String> = self.store.list_keys().await?;
        let mut report = ReconcileReport::default();

        for snapshot in snapshots {
            let known = unseen.remove(&snapshot.name);
            report.seen += 1;

            let entry = match self.store.get(&snapshot.name, now).await {
                Ok(entry) => entry,
                Err(e) => {
                    log::error!("Failed to read cache for '{}': {}", snapshot.name, e);
                    report.cache_errors += 1;
                    continue;
                }
            };

            match self.decide(snapshot, &entry, now) {
                Some(alert) => self.alert_and_record(alert, snapshot, entry, now, &mut report).await,
                None => self.refresh_quietly(snapshot, entry, known, &mut report).await,
            }
        }

        let mut removed: Vec<String> = unseen.into_iter().collect();
        removed.sort();
        for name in removed {
            self.remove(name, &mut report).await;
        }

        Ok(report)
    }

    /// Pick the alert owed for `snapshot`, if any. Up and down are exclusive.
    pub fn decide(
        &self,
        snapshot: &EntitySnapshot,
        entry: &CacheEntry,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let interval = self.policy.alert_interval();
        let count = snapshot.available_count;

        if count >= self.policy.up_threshold && entry.up_alert_due(now, interval) {
            Some(Alert::Up {
                name: snapshot.name.clone(),
                count,
                link: self.link_for(snapshot),
            })
        } else if count <= self.policy.down_threshold
            && entry.available_count > self.policy.down_threshold
            && entry.down_alert_due(now, interval)
        {
            Some(Alert::Down {
                name: snapshot.name.clone(),
                count,
                link: self.link_for(snapshot),
            })
        } else {
            None
        }
    }

    /// Send an up or down alert and stamp the entry once it is delivered.
    async fn alert_and_record(
        &self,
        alert: Alert,
        snapshot: &EntitySnapshot,
        mut entry: CacheEntry,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) {
        if let Err(e) = self.alerts.send(&alert.to_string()).await {
            log::error!("Exception sending {} alert for '{}': {}", alert.kind(), alert.name(), e);
            report.failed_alerts += 1;
            return;
        }

        if matches!(alert, Alert::Up { .. }) {
            entry.last_up_alert_at = now;
            report.up_alerts += 1;
        } else {
            entry.last_down_alert_at = now;
            report.down_alerts += 1;
        }
        entry.refresh_from(snapshot);

        if let Err(e) = self.store.put(&snapshot.name, &entry).await {
            log::error!("Alert sent but cache update failed for '{}': {}", snapshot.name, e);
            report.cache_errors += 1;
        }
    }

    /// Persist the observed count without alerting, if the policy asks for it.
    async fn refresh_quietly(
        &self,
        snapshot: &EntitySnapshot,
        mut entry: CacheEntry,
        known: bool,
        report: &mut ReconcileReport,
    ) {
        if self.policy.count_refresh != CountRefresh::Always {
            return;
        }
        let changed = entry.available_count != snapshot.available_count
            || entry.detail_href != snapshot.detail_href;
        if known && !changed {
            return;
        }

        entry.refresh_from(snapshot);
        match self.store.put(&snapshot.name, &entry).await {
            Ok(()) => report.refreshed += 1,
            Err(e) => {
                log::error!("Failed to refresh cache for '{}': {}", snapshot.name, e);
                report.cache_errors += 1;
            }
        }
    }

    /// Announce a vanished clinic, then forget it. A failed send keeps the
    /// entry so the removal is retried next poll.
    async fn remove(&self, name: String, report: &mut ReconcileReport) {
        let alert = Alert::Removed { name };
        if let Err(e) = self.alerts.send(&alert.to_string()).await {
            log::error!("Exception sending REMOVED alert for '{}': {}", alert.name(), e);
            report.failed_alerts += 1;
            return;
        }
        report.removals += 1;

        if let Err(e) = self.store.delete(alert.name()).await {
            log::error!("Failed to delete cache entry for '{}': {}", alert.name(), e);
            report.cache_errors += 1;
        }
    }

    fn link_for(&self, snapshot: &EntitySnapshot) -> String {
        match snapshot.detail_href.as_deref() {
            Some(href) => utils::resolve(&self.base_url, href)
                .unwrap_or_else(|| format!("{}{}", self.base_url, href)),
            None => self.search_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::services::RecordingAlerter;
    use crate::storage::MemoryBackend;

    const BASE: &str = "https://clinics.example.com";
    const SEARCH: &str = "https://clinics.example.com/search?zip=98101";

    struct Harness {
        policy: PolicyConfig,
    }

    impl Harness {
        fn new(count_refresh: CountRefresh) -> Self {
            Self {
                policy: PolicyConfig {
                    up_threshold: 25,
                    down_threshold: 5,
                    alert_interval_minutes: 60,
                    count_refresh,
                },
            }
        }

        fn reconciler(&self, alerts: RecordingAlerter) -> (Reconciler<'_>, Arc<RecordingAlerter>) {
            let alerts = Arc::new(alerts);
            let store =
                CacheStore::new(Box::new(MemoryBackend::new()), self.policy.alert_interval());
            let reconciler = Reconciler::new(
                store,
                Box::new(SharedSink(Arc::clone(&alerts))),
                &self.policy,
                BASE,
                SEARCH,
            );
            (reconciler, alerts)
        }
    }

    /// Lets a test keep a handle on the sink it hands to the reconciler.
    struct SharedSink(Arc<RecordingAlerter>);

    #[async_trait::async_trait]
    impl AlertSink for SharedSink {
        async fn send(&self, message: &str) -> Result<()> {
            self.0.send(message).await
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn snap(name: &str, count: u32, href: Option<&str>) -> EntitySnapshot {
        EntitySnapshot::new(name, count, href)
    }

    async fn seed(reconciler: &Reconciler<'_>, name: &str, count: u32) {
        let mut entry = CacheEntry::fresh(now(), Duration::minutes(60));
        entry.available_count = count;
        reconciler.store().put(name, &entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_up_alert_on_fresh_cache() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());

        let report = reconciler
            .reconcile(&[snap("Clinic A", 30, Some("/a"))], now())
            .await
            .unwrap();

        assert_eq!(report.up_alerts, 1);
        let sent = alerts.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("30 available appointments at Clinic A!"));
        assert!(sent[0].contains("Link to register: https://clinics.example.com/a"));

        let entry = reconciler.store().get("Clinic A", now()).await.unwrap();
        assert_eq!(entry.available_count, 30);
        assert_eq!(entry.detail_href.as_deref(), Some("/a"));
        assert_eq!(entry.last_up_alert_at, now());
    }

    #[tokio::test]
    async fn test_up_alert_respects_cooldown() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());
        let clinics = [snap("Clinic A", 40, Some("/a"))];

        reconciler.reconcile(&clinics, now()).await.unwrap();
        reconciler
            .reconcile(&clinics, now() + Duration::minutes(30))
            .await
            .unwrap();
        reconciler
            .reconcile(&clinics, now() + Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(alerts.sent().len(), 1);

        reconciler
            .reconcile(&clinics, now() + Duration::minutes(61))
            .await
            .unwrap();
        assert_eq!(alerts.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_down_alert_on_transition_then_cooldown() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());
        seed(&reconciler, "Clinic A", 10).await;

        let report = reconciler
            .reconcile(&[snap("Clinic A", 3, Some("/a"))], now())
            .await
            .unwrap();
        assert_eq!(report.down_alerts, 1);
        assert!(alerts.sent()[0].starts_with("3 available appointments at Clinic A."));
        let entry = reconciler.store().get("Clinic A", now()).await.unwrap();
        assert_eq!(entry.available_count, 3);
        assert_eq!(entry.last_down_alert_at, now());

        let report = reconciler
            .reconcile(&[snap("Clinic A", 2, Some("/a"))], now() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(report.alerts_sent(), 0);
        assert_eq!(alerts.sent().len(), 1);
        let entry = reconciler.store().get("Clinic A", now()).await.unwrap();
        assert_eq!(entry.available_count, 3);
    }

    #[tokio::test]
    async fn test_no_down_alert_without_prior_high_count() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());

        reconciler
            .reconcile(&[snap("Clinic A", 1, None)], now())
            .await
            .unwrap();

        assert!(alerts.sent().is_empty());
        assert!(reconciler.store().list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_clinic_alerted_once_and_purged() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());
        seed(&reconciler, "Clinic B", 40).await;

        let report = reconciler
            .reconcile(&[snap("Clinic A", 10, None)], now())
            .await
            .unwrap();
        assert_eq!(report.removals, 1);
        reconciler
            .reconcile(&[snap("Clinic A", 10, None)], now() + Duration::minutes(2))
            .await
            .unwrap();

        assert_eq!(
            alerts.sent(),
            vec!["Clinic B removed from search results. No appointments available now.".to_string()]
        );
        assert!(!reconciler.store().list_keys().await.unwrap().contains("Clinic B"));
    }

    #[tokio::test]
    async fn test_failed_dispatch_leaves_cache_untouched() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, _) = harness.reconciler(RecordingAlerter::failing());
        seed(&reconciler, "Clinic B", 8).await;

        let report = reconciler
            .reconcile(&[snap("Clinic A", 30, Some("/a"))], now())
            .await
            .unwrap();

        assert_eq!(report.failed_alerts, 2);
        assert_eq!(report.alerts_sent(), 0);
        let keys = reconciler.store().list_keys().await.unwrap();
        assert_eq!(keys, HashSet::from(["Clinic B".to_string()]));
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_retried_next_poll() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::failing());
        let clinics = [snap("Clinic A", 30, Some("/a"))];

        let report = reconciler.reconcile(&clinics, now()).await.unwrap();
        assert_eq!(report.failed_alerts, 1);
        assert!(alerts.sent().is_empty());
        let entry = reconciler.store().get("Clinic A", now()).await.unwrap();
        assert!(entry.up_alert_due(now(), Duration::minutes(60)));

        alerts.set_failing(false);
        let later = now() + Duration::minutes(2);
        let report = reconciler.reconcile(&clinics, later).await.unwrap();

        assert_eq!(report.up_alerts, 1);
        assert_eq!(alerts.sent().len(), 1);
        let entry = reconciler.store().get("Clinic A", later).await.unwrap();
        assert_eq!(entry.last_up_alert_at, later);
        assert_eq!(entry.available_count, 30);
    }

    #[tokio::test]
    async fn test_out_of_range_interval_does_not_panic() {
        let mut harness = Harness::new(CountRefresh::Always);
        harness.policy.alert_interval_minutes = 1_000_000_000_000;
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());
        seed(&reconciler, "Gone", 12).await;

        let report = reconciler
            .reconcile(&[snap("Clinic A", 30, Some("/a")), snap("Clinic B", 1, None)], now())
            .await
            .unwrap();

        assert_eq!(report.seen, 2);
        assert_eq!(report.up_alerts, 1);
        assert_eq!(report.removals, 1);
        assert_eq!(alerts.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_second_identical_pass_sends_nothing() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());
        seed(&reconciler, "Clinic C", 12).await;
        seed(&reconciler, "Gone", 12).await;
        let clinics = [
            snap("Clinic A", 50, Some("/a")),
            snap("Clinic C", 0, Some("/c")),
        ];

        let first = reconciler.reconcile(&clinics, now()).await.unwrap();
        let second = reconciler
            .reconcile(&clinics, now() + Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(first.alerts_sent(), 3);
        assert_eq!(second.alerts_sent(), 0);
        assert_eq!(alerts.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_up_wins_over_down() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, _) = harness.reconciler(RecordingAlerter::new());
        let mut entry = CacheEntry::fresh(now(), Duration::minutes(60));
        entry.available_count = 100;

        let alert = reconciler.decide(&snap("Clinic A", 30, None), &entry, now());
        assert!(matches!(alert, Some(Alert::Up { .. })));

        entry.last_up_alert_at = now();
        assert_eq!(reconciler.decide(&snap("Clinic A", 30, None), &entry, now()), None);
    }

    #[tokio::test]
    async fn test_missing_href_links_to_search_page() {
        let harness = Harness::new(CountRefresh::OnAlert);
        let (reconciler, _) = harness.reconciler(RecordingAlerter::new());
        let entry = CacheEntry::fresh(now(), Duration::minutes(60));

        let alert = reconciler.decide(&snap("Clinic A", 30, None), &entry, now());
        match alert {
            Some(Alert::Up { link, .. }) => assert_eq!(link, SEARCH),
            other => panic!("expected up alert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_always_refresh_tracks_count_between_alerts() {
        let harness = Harness::new(CountRefresh::Always);
        let (reconciler, alerts) = harness.reconciler(RecordingAlerter::new());

        let report = reconciler
            .reconcile(&[snap("Clinic A", 12, Some("/a"))], now())
            .await
            .unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.alerts_sent(), 0);
        let entry = reconciler.store().get("Clinic A", now()).await.unwrap();
        assert_eq!(entry.available_count, 12);
        assert!(entry.down_alert_due(now(), Duration::minutes(60)));

        let report = reconciler
            .reconcile(&[snap("Clinic A", 12, Some("/a"))], now() + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(report.refreshed, 0);

        reconciler
            .reconcile(&[snap("Clinic A", 4, Some("/a"))], now() + Duration::minutes(4))
            .await
            .unwrap();
        assert_eq!(alerts.sent().len(), 1);
        assert!(alerts.sent()[0].starts_with("4 available appointments at Clinic A."));
    }
}
