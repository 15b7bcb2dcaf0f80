//! Cached per-clinic state and its persisted record format.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::EntitySnapshot;

/// Version written into every persisted record.
pub const RECORD_VERSION: u32 = 1;

/// Last-known state of a clinic and when it was last alerted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub available_count: u32,
    pub detail_href: Option<String>,
    pub last_up_alert_at: DateTime<Utc>,
    pub last_down_alert_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry for a clinic never seen before.
    ///
    /// Both alert timestamps sit two cooldown windows in the past so either
    /// alert may fire on the first poll.
    pub fn fresh(now: DateTime<Utc>, alert_interval: Duration) -> Self {
        let eligible = alert_interval
            .checked_mul(2)
            .map_or(DateTime::<Utc>::MIN_UTC, |window| before(now, window));
        Self {
            available_count: 0,
            detail_href: None,
            last_up_alert_at: eligible,
            last_down_alert_at: eligible,
        }
    }

    /// Whether the up-alert cooldown has elapsed.
    pub fn up_alert_due(&self, now: DateTime<Utc>, alert_interval: Duration) -> bool {
        self.last_up_alert_at < before(now, alert_interval)
    }

    /// Whether the down-alert cooldown has elapsed.
    pub fn down_alert_due(&self, now: DateTime<Utc>, alert_interval: Duration) -> bool {
        self.last_down_alert_at < before(now, alert_interval)
    }

    /// Copy the observed count and link into the entry.
    pub fn refresh_from(&mut self, snapshot: &EntitySnapshot) {
        self.available_count = snapshot.available_count;
        self.detail_href = snapshot.detail_href.clone();
    }

    /// Serialize the entry for storage under `name`.
    pub fn encode(&self, name: &str) -> Result<String> {
        let record = CacheRecord {
            version: RECORD_VERSION,
            name: name.to_string(),
            available_appointments: Some(self.available_count),
            href: self.detail_href.clone(),
            alerted_up: Some(self.last_up_alert_at),
            alerted_down: Some(self.last_down_alert_at),
        };
        Ok(serde_json::to_string(&record)?)
    }

    /// Decode a stored record.
    ///
    /// Missing fields fall back to the values of [`CacheEntry::fresh`].
    /// Bytes that are not UTF-8 JSON are an error.
    pub fn decode(raw: &[u8], now: DateTime<Utc>, alert_interval: Duration) -> Result<Self> {
        let record: CacheRecord = serde_json::from_slice(raw)?;
        if record.version > RECORD_VERSION {
            return Err(AppError::validation(format!(
                "record version {} is newer than supported version {}",
                record.version, RECORD_VERSION
            )));
        }

        let fresh = Self::fresh(now, alert_interval);
        Ok(Self {
            available_count: record.available_appointments.unwrap_or(0),
            detail_href: record.href,
            last_up_alert_at: record.alerted_up.unwrap_or(fresh.last_up_alert_at),
            last_down_alert_at: record.alerted_down.unwrap_or(fresh.last_down_alert_at),
        })
    }
}

/// `now - window`, clamped to the earliest representable instant.
fn before(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// On-disk / in-Redis shape of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    #[serde(default = "initial_version")]
    version: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    available_appointments: Option<u32>,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    alerted_up: Option<DateTime<Utc>>,
    #[serde(default)]
    alerted_down: Option<DateTime<Utc>>,
}

fn initial_version() -> u32 {
    1
}
