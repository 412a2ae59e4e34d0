//! Working out how many pages a topic has.
//!
//! The site's pager links are trusted once they point at page 3 or
//! beyond. Shorter topics are walked page by page, within a small share of
//! the request budget.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::extractor::EntryExtractor;
use super::fetcher::PageSource;
use super::orchestrator::{pause_between_pages, ScrapeSettings};
use super::ScrapeError;
use crate::constants::PAGE_PARAM;
use crate::topic::page_url;

/// Link-derived counts at or above this are trusted without probing.
const TRUSTED_LINK_PAGES: u32 = 3;

static HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']*)["']"#).expect("valid href regex")
});

/// Outbound page fetches allowed for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBudget {
    limit: u32,
    used: u32,
}

impl RequestBudget {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Take one unit; `false` when none are left.
    pub fn try_acquire(&mut self) -> bool {
        if self.used < self.limit {
            self.used += 1;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.limit - self.used
    }

    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// Result of page-count discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDiscovery {
    /// Last page to scrape, clamped to the request budget.
    pub last_page: u32,
    /// Last page as seen on the site.
    pub reported_last_page: u32,
    /// Fetches spent on discovery.
    pub requests: u32,
    /// Body of page 1, already paid for.
    pub first_page: String,
}

/// Highest `p` value among links on `page` that point at the topic `base`.
#[must_use]
pub fn max_page_from_links(html: &str, page: &Url, base: &Url) -> u32 {
    HREF.captures_iter(html)
        .filter_map(|caps| {
            let href = html_escape::decode_html_entities(caps.get(1)?.as_str()).into_owned();
            let target = page.join(&href).ok()?;
            if target.path() != base.path() {
                return None;
            }
            target
                .query_pairs()
                .find(|(key, _)| key == PAGE_PARAM)
                .and_then(|(_, value)| value.parse::<u32>().ok())
        })
        .fold(1, u32::max)
}

/// Discovery's slice of the shared budget.
struct DiscoveryQuota<'a> {
    budget: &'a mut RequestBudget,
    cap: u32,
    spent: u32,
}

impl DiscoveryQuota<'_> {
    fn take(&mut self) -> bool {
        if self.spent < self.cap && self.budget.try_acquire() {
            self.spent += 1;
            true
        } else {
            false
        }
    }
}

/// Determine the last page of the topic at `base`.
///
/// Consumes at most `settings.discovery_budget` units of `budget`.
///
/// # Errors
///
/// Fails when the first page cannot be fetched or no budget is left for it.
pub async fn discover_last_page(
    source: &dyn PageSource,
    extractor: &EntryExtractor,
    base: &Url,
    budget: &mut RequestBudget,
    settings: &ScrapeSettings,
) -> Result<PageDiscovery, ScrapeError> {
    let limit = budget.limit();
    let mut quota = DiscoveryQuota {
        budget,
        cap: settings.discovery_budget,
        spent: 0,
    };

    if !quota.take() {
        return Err(ScrapeError::BudgetExhausted(limit));
    }
    let first_url = page_url(base, 1);
    let first = source
        .fetch_page(&first_url)
        .await
        .map_err(ScrapeError::FirstPage)?;
    let from_links = max_page_from_links(&first, &first_url, base);
    debug!(base = %base, from_links, "Scanned first page links");

    let reported = if from_links >= TRUSTED_LINK_PAGES {
        from_links
    } else {
        walk_pages(source, extractor, base, &mut quota, settings, from_links).await
    };

    let discovery = PageDiscovery {
        last_page: reported.min(limit),
        reported_last_page: reported,
        requests: quota.spent,
        first_page: first,
    };
    info!(
        base = %base,
        last_page = discovery.last_page,
        reported_last_page = discovery.reported_last_page,
        requests = discovery.requests,
        "Discovered topic page count"
    );
    Ok(discovery)
}

/// Check page 2 and walk forward while pages keep having entries.
async fn walk_pages(
    source: &dyn PageSource,
    extractor: &EntryExtractor,
    base: &Url,
    quota: &mut DiscoveryQuota<'_>,
    settings: &ScrapeSettings,
    from_links: u32,
) -> u32 {
    if !quota.take() {
        return from_links;
    }
    pause_between_pages(settings).await;

    let second_url = page_url(base, 2);
    let second = match source.fetch_page(&second_url).await {
        Ok(html) => html,
        Err(e) => {
            debug!(error = %e, "Second page unavailable");
            return 1;
        }
    };

    let candidate = from_links.max(max_page_from_links(&second, &second_url, base));
    if candidate >= TRUSTED_LINK_PAGES {
        return candidate;
    }
    if extractor.extract(&second).is_empty() {
        return 1;
    }

    let mut last = 2;
    while quota.take() {
        pause_between_pages(settings).await;
        let next = last + 1;
        match source.fetch_page(&page_url(base, next)).await {
            Ok(html) if !extractor.extract(&html).is_empty() => last = next,
            Ok(_) => {
                debug!(page = next, "Walked into an empty page");
                break;
            }
            Err(e) => {
                warn!(page = next, error = %e, "Page fetch failed; stopping discovery");
                break;
            }
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::pipeline::fetcher::{AttemptFailure, FetchError};

    struct StubSite {
        pages: HashMap<u32, String>,
        requested: Mutex<Vec<u32>>,
    }

    impl StubSite {
        fn new(pages: Vec<(u32, String)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for StubSite {
        async fn fetch_page(&self, url: &Url) -> Result<String, FetchError> {
            let page = url
                .query_pairs()
                .find(|(k, _)| k == "p")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(1);
            self.requested.lock().unwrap().push(page);
            self.pages.get(&page).cloned().ok_or_else(|| FetchError::Exhausted {
                url: url.to_string(),
                attempts: 4,
                last: AttemptFailure::Status(404),
            })
        }
    }

    fn settings(discovery_budget: u32) -> ScrapeSettings {
        ScrapeSettings {
            request_budget: 48,
            discovery_budget,
            page_delay_min: Duration::ZERO,
            page_delay_max: Duration::ZERO,
        }
    }

    fn topic_page(pager_max: u32) -> String {
        let links: String = (1..=pager_max)
            .map(|p| format!(r#"<a href="/foo--123?p={p}">{p}</a>"#))
            .collect();
        format!(
            r#"<html><body><ul id="entry-item-list"><li data-id="1"><div class="content">bir entry metni</div></li></ul>
<div class="pager">{links}</div><a href="/bar--9?p=99">başka</a></body></html>"#
        )
    }

    fn base() -> Url {
        Url::parse("https://eksisozluk.com/foo--123").unwrap()
    }

    #[test]
    fn test_link_scan_ignores_other_topics_and_decodes_entities() {
        let page = page_url(&base(), 1);
        let html = r#"<a href="/foo--123?a=nice&amp;p=7">7</a><a href="https://eksisozluk.com/bar--1?p=50">x</a><a href="?p=4">4</a>"#;
        assert_eq!(max_page_from_links(html, &page, &base()), 7);
        assert_eq!(max_page_from_links("<p>none</p>", &page, &base()), 1);
    }

    #[test]
    fn test_budget_accounting() {
        let mut budget = RequestBudget::new(2);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.used(), 2);
    }

    #[tokio::test]
    async fn test_trusts_pager_links_from_first_page() {
        let site = StubSite::new(vec![(1, topic_page(12))]);
        let mut budget = RequestBudget::new(48);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8))
            .await
            .unwrap();
        assert_eq!(found.last_page, 12);
        assert_eq!(site.requested(), vec![1]);
        assert_eq!(budget.used(), 1);
    }

    #[tokio::test]
    async fn test_walks_forward_until_empty_page() {
        let empty = format!("<html><body>{}</body></html>", " ".repeat(200));
        let site = StubSite::new(vec![
            (1, topic_page(2)),
            (2, topic_page(2)),
            (3, topic_page(0)),
            (4, empty),
        ]);
        let mut budget = RequestBudget::new(48);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8))
            .await
            .unwrap();
        assert_eq!(found.last_page, 3);
        assert_eq!(site.requested(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_walk_stops_at_fetch_failure_and_discovery_cap() {
        let site = StubSite::new((1..=20).map(|p| (p, topic_page(0))).collect());
        let mut budget = RequestBudget::new(48);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(5))
            .await
            .unwrap();
        assert_eq!(found.last_page, 5);
        assert_eq!(found.requests, 5);

        let site = StubSite::new(vec![(1, topic_page(1)), (2, topic_page(1))]);
        let mut budget = RequestBudget::new(48);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8))
            .await
            .unwrap();
        assert_eq!(found.last_page, 2);
    }

    #[tokio::test]
    async fn test_single_page_topic() {
        let site = StubSite::new(vec![(1, topic_page(0))]);
        let mut budget = RequestBudget::new(48);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8))
            .await
            .unwrap();
        assert_eq!(found.last_page, 1);
    }

    #[tokio::test]
    async fn test_result_clamped_to_request_budget() {
        let site = StubSite::new(vec![(1, topic_page(400))]);
        let mut budget = RequestBudget::new(30);
        let found = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8))
            .await
            .unwrap();
        assert_eq!(found.last_page, 30);
        assert_eq!(found.reported_last_page, 400);
    }

    #[tokio::test]
    async fn test_first_page_failure_is_fatal() {
        let site = StubSite::new(Vec::new());
        let mut budget = RequestBudget::new(48);
        let result = discover_last_page(&site, &EntryExtractor::default(), &base(), &mut budget, &settings(8)).await;
        assert!(matches!(result, Err(ScrapeError::FirstPage(_))));
    }
}
