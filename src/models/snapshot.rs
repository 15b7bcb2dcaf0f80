//! Clinic snapshot data structure.

use serde::{Deserialize, Serialize};

/// One clinic as observed on the search page during a single poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Clinic display name, also the cache key
    pub name: String,

    /// Appointments currently offered
    pub available_count: u32,

    /// Link to the clinic's registration page, usually site-relative
    pub detail_href: Option<String>,
}

impl EntitySnapshot {
    pub fn new(name: impl Into<String>, available_count: u32, detail_href: Option<&str>) -> Self {
        Self {
            name: name.into(),
            available_count,
            detail_href: detail_href.map(str::to_string),
        }
    }
}
