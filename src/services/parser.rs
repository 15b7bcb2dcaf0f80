// src/services/parser.rs

//! Search page parser.
//!
//! The page has no stable ids or classes for clinic cards, so extraction is
//! anchored on the "Available Appointments" label:
//!
//! ```text
//! card                      <- 3rd ancestor: first <p> is the name, first <a> the link
//! ├── <p>Clinic name</p>
//! ├── counts                <- 2nd ancestor: first digit run is the count
//! │   ├── label             <- 1st ancestor (holds the text node)
//! │   └── 14
//! └── <a href="/clinic/..">
//! ```

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{AppError, Result};
use crate::models::EntitySnapshot;

/// Text that marks an appointment count block.
pub const AVAILABILITY_MARKER: &str = "Available Appointments";

/// Extracts clinic snapshots from search result markup.
#[derive(Debug, Clone)]
pub struct PageParser {
    name_sel: Selector,
    link_sel: Selector,
    count_re: Regex,
}

impl PageParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            name_sel: Self::parse_selector("p")?,
            link_sel: Self::parse_selector("a")?,
            count_re: Regex::new(r"\d+")?,
        })
    }

    /// Parse raw page bytes. Invalid UTF-8 is replaced, never rejected.
    pub fn parse_bytes(&self, content: &[u8]) -> Vec<EntitySnapshot> {
        self.parse(&String::from_utf8_lossy(content))
    }

    /// Parse markup into snapshots in document order.
    ///
    /// Matches missing a name are skipped; a repeated name keeps its first
    /// occurrence. No matches at all yields an empty list.
    pub fn parse(&self, html: &str) -> Vec<EntitySnapshot> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut snapshots = Vec::new();

        for node in document.tree.root().descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };
            if !text.contains(AVAILABILITY_MARKER) {
                continue;
            }

            let mut ancestors = node.ancestors().filter_map(ElementRef::wrap).skip(1);
            let count_scope = ancestors.next();
            let card = ancestors.next();

            let (Some(count_scope), Some(card)) = (count_scope, card) else {
                log::debug!("Availability label without enclosing card, skipping");
                continue;
            };

            let Some(snapshot) = self.extract(count_scope, card) else {
                continue;
            };
            if seen.insert(snapshot.name.clone()) {
                snapshots.push(snapshot);
            } else {
                log::debug!("Duplicate clinic '{}' on page, keeping first", snapshot.name);
            }
        }

        snapshots
    }

    fn extract(&self, count_scope: ElementRef<'_>, card: ElementRef<'_>) -> Option<EntitySnapshot> {
        let count_text: String = count_scope.text().collect();
        let available_count = self
            .count_re
            .find(&count_text)
            .map(|m| {
                // Only overflow can fail here.
                m.as_str().parse().unwrap_or_else(|_| {
                    log::debug!("Count '{}' exceeds u32, saturating", m.as_str());
                    u32::MAX
                })
            })
            .unwrap_or(0);

        let name = match card.select(&self.name_sel).next() {
            Some(p) => p.text().collect::<String>().trim().to_string(),
            None => {
                log::debug!("Clinic card without a <p> name, skipping");
                return None;
            }
        };
        if name.is_empty() {
            log::debug!("Clinic card with an empty name, skipping");
            return None;
        }

        let detail_href = card
            .select(&self.link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        Some(EntitySnapshot {
            name,
            available_count,
            detail_href,
        })
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}
