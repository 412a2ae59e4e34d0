//! Sequential topic scraping.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::discovery::{discover_last_page, RequestBudget};
use super::extractor::{Entry, EntryExtractor};
use super::fetcher::PageSource;
use super::ScrapeError;
use crate::topic::{normalize_base_url, page_url};

/// Limits and pacing of one scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSettings {
    /// Page fetches allowed per scrape, discovery included.
    pub request_budget: u32,
    /// Share of the budget discovery may use.
    pub discovery_budget: u32,
    pub page_delay_min: Duration,
    pub page_delay_max: Duration,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            request_budget: 48,
            discovery_budget: 8,
            page_delay_min: Duration::from_millis(80),
            page_delay_max: Duration::from_millis(200),
        }
    }
}

/// Sleep a random delay from the configured range.
pub(crate) async fn pause_between_pages(settings: &ScrapeSettings) {
    let delay = if settings.page_delay_max > settings.page_delay_min {
        rand::thread_rng().gen_range(settings.page_delay_min..=settings.page_delay_max)
    } else {
        settings.page_delay_min
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOutcome {
    /// Entries in final order; `order` runs `0..len`.
    pub entries: Vec<Entry>,
    /// Pages planned after discovery.
    pub last_page: u32,
    /// Page count as seen on the site.
    pub reported_last_page: u32,
    /// Pages whose entries were collected.
    pub pages_scraped: u32,
    /// Whether the topic has pages that were not collected.
    pub truncated: bool,
}

/// Collects entries across pages.
struct Accumulator {
    base: Url,
    seen: HashSet<String>,
    pinned_taken: bool,
    entries: Vec<Entry>,
}

impl Accumulator {
    fn new(base: Url) -> Self {
        Self {
            base,
            seen: HashSet::new(),
            pinned_taken: false,
            entries: Vec::new(),
        }
    }

    /// Append one page; returns how many entries were kept.
    fn push_page(&mut self, page: u32, entries: Vec<Entry>) -> usize {
        let before = self.entries.len();
        for mut entry in entries {
            if entry.is_pinned() {
                if page != 1 || self.pinned_taken {
                    continue;
                }
                self.pinned_taken = true;
            } else if entry.has_numeric_id() {
                if !self.seen.insert(entry.id.clone()) {
                    debug!(page, id = %entry.id, "Skipping entry seen on an earlier page");
                    continue;
                }
                entry.entry_url = self
                    .base
                    .join(&format!("/entry/{}", entry.id))
                    .ok()
                    .map(String::from);
            } else {
                entry.id = format!("order-{}", self.entries.len());
            }
            entry.order = self.entries.len();
            self.entries.push(entry);
        }
        self.entries.len() - before
    }
}

/// Drives discovery, fetching and extraction for a topic.
pub struct TopicScraper {
    source: Arc<dyn PageSource>,
    extractor: EntryExtractor,
    settings: ScrapeSettings,
}

impl TopicScraper {
    #[must_use]
    pub fn new(
        source: Arc<dyn PageSource>,
        extractor: EntryExtractor,
        settings: ScrapeSettings,
    ) -> Self {
        Self {
            source,
            extractor,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Scrape every reachable page of the topic at `base_url`, one page at
    /// a time. Stops early once `limit` entries are collected.
    ///
    /// # Errors
    ///
    /// Fails only when the first page cannot be fetched. A later page that
    /// fails or comes back empty ends the scrape with what was collected.
    pub async fn scrape(
        &self,
        base_url: &Url,
        limit: Option<usize>,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let base = normalize_base_url(base_url);
        let mut budget = RequestBudget::new(self.settings.request_budget);

        let discovery = discover_last_page(
            self.source.as_ref(),
            &self.extractor,
            &base,
            &mut budget,
            &self.settings,
        )
        .await?;

        let pages_affordable = discovery.last_page.min(budget.remaining() + 1);
        if discovery.reported_last_page > pages_affordable {
            warn!(
                base = %base,
                reported_last_page = discovery.reported_last_page,
                pages_affordable,
                "Topic is longer than the request budget allows; scraping a prefix"
            );
        }

        let mut accumulator = Accumulator::new(base.clone());
        let mut pages_scraped = 0;
        let mut first_page = Some(discovery.first_page);

        for page in 1..=pages_affordable {
            let html = if let Some(html) = first_page.take() {
                html
            } else {
                if !budget.try_acquire() {
                    break;
                }
                pause_between_pages(&self.settings).await;
                match self.source.fetch_page(&page_url(&base, page)).await {
                    Ok(html) => html,
                    Err(e) => {
                        warn!(page, error = %e, "Page fetch failed; keeping entries collected so far");
                        break;
                    }
                }
            };

            let entries = self.extractor.extract(&html);
            if entries.is_empty() && page > 1 {
                info!(page, "Page has no entries; treating it as the end of the topic");
                break;
            }

            let kept = accumulator.push_page(page, entries);
            pages_scraped = page;
            debug!(page, kept, total = accumulator.entries.len(), "Collected page");

            if limit.is_some_and(|limit| accumulator.entries.len() >= limit) {
                break;
            }
        }

        let mut entries = accumulator.entries;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        info!(
            base = %base,
            entries = entries.len(),
            pages_scraped,
            requests = budget.used(),
            "Scrape finished"
        );

        Ok(ScrapeOutcome {
            entries,
            last_page: discovery.last_page,
            reported_last_page: discovery.reported_last_page,
            pages_scraped,
            truncated: pages_scraped < discovery.reported_last_page,
        })
    }
}
