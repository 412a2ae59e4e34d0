//! Integration tests for fetching and scraping topics against a mock site.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use eksi_scraper::config::Config;
use eksi_scraper::pipeline::{
    AttemptFailure, EntryExtractor, FetchError, HttpFetcher, PageSource, ScrapeError, TopicScraper,
};
use url::Url;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOPIC_PATH: &str = "/foo--123";

/// A topic page with an optional pinned entry, the given entry ids and
/// pager links up to `pager_max`.
fn topic_page(ids: RangeInclusive<u32>, pinned: bool, pager_max: u32) -> String {
    let pinned = if pinned {
        r#"<div id="pinned-entry"><ul><li data-author="moderatör"><div class="content">başlık hakkında sabit not</div></li></ul></div>"#
    } else {
        ""
    };
    let entries: String = ids
        .map(|id| {
            format!(
                r#"<li data-id="{id}" data-author="yazar {id}" data-favorite-count="{id}">
  <div class="content">entry {id} metni</div>
  <footer><a class="entry-date permalink" href="/entry/{id}">01.02.2024 10:{:02}</a></footer>
</li>
"#,
                id % 60
            )
        })
        .collect();
    let pager: String = (1..=pager_max)
        .map(|p| format!(r#"<a href="{TOPIC_PATH}?p={p}">{p}</a>"#))
        .collect();
    format!(
        r#"<!DOCTYPE html><html><head><title>foo</title></head><body>
{pinned}
<ul id="entry-item-list">
{entries}</ul>
<div class="pager">{pager}</div>
</body></html>"#
    )
}

fn page_without_entries() -> String {
    format!(
        "<html><body><p>bu sayfada entry yok</p>{}</body></html>",
        " ".repeat(120)
    )
}

fn test_config(server: &MockServer) -> Config {
    Config {
        site_base_url: Url::parse(&server.uri()).expect("mock server URL"),
        ..Config::for_testing()
    }
}

fn scraper_for(config: &Config) -> TopicScraper {
    let fetcher = HttpFetcher::from_config(config).expect("Failed to build fetcher");
    TopicScraper::new(
        Arc::new(fetcher),
        EntryExtractor::from_config(config),
        config.scrape_settings(),
    )
}

fn topic_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}{TOPIC_PATH}", server.uri())).expect("topic URL")
}

async fn mount_page(server: &MockServer, page: u32, body: String, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(TOPIC_PATH))
        .and(query_param("p", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_two_page_topic_with_pinned_entry() {
    let server = MockServer::start().await;

    // Page 1 is fetched once and reused; page 2 is fetched during discovery and again to scrape.
    mount_page(&server, 1, topic_page(1..=20, true, 2), 1).await;
    mount_page(&server, 2, topic_page(21..=35, true, 2), 2).await;
    // Page 3 does not exist: every attempt gets a 404.
    Mock::given(method("GET"))
        .and(path(TOPIC_PATH))
        .and(query_param("p", "3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(4)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let outcome = scraper_for(&config)
        .scrape(&topic_url(&server), None)
        .await
        .expect("scrape should succeed");

    assert_eq!(outcome.entries.len(), 36);
    assert_eq!(outcome.last_page, 2);
    assert_eq!(outcome.pages_scraped, 2);
    assert!(!outcome.truncated);

    let orders: Vec<usize> = outcome.entries.iter().map(|e| e.order).collect();
    assert_eq!(orders, (0..36).collect::<Vec<_>>());

    let pinned = &outcome.entries[0];
    assert_eq!(pinned.id, "pinned");
    assert_eq!(pinned.content, "başlık hakkında sabit not");
    assert_eq!(pinned.author, "moderatör");
    assert_eq!(
        outcome.entries.iter().filter(|e| e.is_pinned()).count(),
        1
    );

    let first = &outcome.entries[1];
    assert_eq!(first.id, "1");
    assert_eq!(first.content, "entry 1 metni");
    assert_eq!(first.author, "yazar 1");
    assert_eq!(first.favorite_count, 1);
    assert_eq!(first.date.as_deref(), Some("01.02.2024 10:01"));
    assert_eq!(
        first.entry_url.as_deref(),
        Some(format!("{}/entry/1", server.uri()).as_str())
    );

    assert_eq!(outcome.entries[35].id, "35");
}

#[tokio::test]
async fn test_first_page_failure_is_fatal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TOPIC_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(4)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let result = scraper_for(&config).scrape(&topic_url(&server), None).await;

    match result {
        Err(ScrapeError::FirstPage(FetchError::Exhausted { attempts, last, .. })) => {
            assert_eq!(attempts, 4);
            assert_eq!(last, AttemptFailure::Status(500));
        }
        other => panic!("expected a first page failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_middle_page_truncates_topic() {
    let server = MockServer::start().await;

    mount_page(&server, 1, topic_page(1..=10, false, 5), 1).await;
    mount_page(&server, 2, topic_page(11..=20, false, 5), 1).await;
    // Blank bodies count as failed attempts.
    mount_page(&server, 3, String::new(), 4).await;
    mount_page(&server, 4, topic_page(31..=40, false, 5), 0).await;
    mount_page(&server, 5, topic_page(41..=50, false, 5), 0).await;

    let config = test_config(&server);
    let outcome = scraper_for(&config)
        .scrape(&topic_url(&server), None)
        .await
        .expect("partial scrape should succeed");

    assert_eq!(outcome.last_page, 5);
    assert_eq!(outcome.pages_scraped, 2);
    assert!(outcome.truncated);
    assert_eq!(outcome.entries.len(), 20);
    assert_eq!(outcome.entries.last().map(|e| e.id.as_str()), Some("20"));
}

#[tokio::test]
async fn test_limit_stops_fetching_early() {
    let server = MockServer::start().await;

    mount_page(&server, 1, topic_page(1..=10, false, 9), 1).await;
    mount_page(&server, 2, topic_page(11..=20, false, 9), 1).await;
    mount_page(&server, 3, topic_page(21..=30, false, 9), 0).await;

    let config = test_config(&server);
    let outcome = scraper_for(&config)
        .scrape(&topic_url(&server), Some(15))
        .await
        .expect("scrape should succeed");

    assert_eq!(outcome.entries.len(), 15);
    assert_eq!(outcome.pages_scraped, 2);
    assert_eq!(outcome.reported_last_page, 9);
    assert!(outcome.truncated);
}

#[tokio::test]
async fn test_budget_caps_pages_fetched() {
    let server = MockServer::start().await;

    for page in 1..=4 {
        let first = (page - 1) * 10 + 1;
        let hits = u64::from(page <= 3);
        mount_page(&server, page, topic_page(first..=first + 9, false, 40), hits).await;
    }

    let config = Config {
        request_budget: 3,
        discovery_budget: 1,
        ..test_config(&server)
    };
    let outcome = scraper_for(&config)
        .scrape(&topic_url(&server), None)
        .await
        .expect("scrape should succeed");

    assert_eq!(outcome.last_page, 3);
    assert_eq!(outcome.reported_last_page, 40);
    assert_eq!(outcome.pages_scraped, 3);
    assert_eq!(outcome.entries.len(), 30);
    assert!(outcome.truncated);
}

#[tokio::test]
async fn test_challenged_desktop_profile_falls_back_to_mobile() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TOPIC_PATH))
        .and(query_param("p", "1"))
        .and(header_regex("user-agent", "Android"))
        .respond_with(ResponseTemplate::new(200).set_body_string(topic_page(1..=3, false, 0)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TOPIC_PATH))
        .and(query_param("p", "2"))
        .and(header_regex("user-agent", "Android"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_without_entries()))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            r#"<html><body><div id="cf-chl-widget">Just a moment...</div></body></html>"#,
        ))
        .with_priority(5)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let outcome = scraper_for(&config)
        .scrape(&topic_url(&server), None)
        .await
        .expect("mobile profile should get through");

    assert_eq!(outcome.last_page, 1);
    let ids: Vec<&str> = outcome.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_ordinary_page_with_challenge_script_is_fetched() {
    let server = MockServer::start().await;

    let body = format!(
        r#"{}<script src="/cdn-cgi/challenge-platform/scripts/jsd/main.js"></script>"#,
        topic_page(7..=7, false, 0)
    );
    Mock::given(method("GET"))
        .and(path("/kedi--7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let fetcher = HttpFetcher::from_config(&config).expect("Failed to build fetcher");
    let url = Url::parse(&format!("{}/kedi--7", server.uri())).unwrap();

    let fetched = fetcher.fetch_page(&url).await.expect("page should be accepted");
    assert_eq!(fetched, body);
    let entries = EntryExtractor::from_config(&config).extract(&fetched);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "7");
}

#[tokio::test]
async fn test_fetcher_sends_browser_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/kedi--5"))
        .and(header_regex("accept-language", "^tr-TR"))
        .and(header_regex("user-agent", "Windows NT"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>kedi</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let fetcher = HttpFetcher::from_config(&config).expect("Failed to build fetcher");
    let url = Url::parse(&format!("{}/kedi--5", server.uri())).unwrap();

    let body = fetcher.fetch_page(&url).await.expect("fetch should succeed");
    assert_eq!(body, "<html>kedi</html>");
}

#[tokio::test]
async fn test_fetcher_gives_up_after_timeouts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>geç</html>")
                .set_delay(Duration::from_millis(800)),
        )
        .expect(4)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let fetcher = HttpFetcher::new(
        config.client_profiles(),
        config.retry_policy(),
        Duration::from_millis(100),
    )
    .expect("Failed to build fetcher");
    let url = Url::parse(&format!("{}/yavas--9", server.uri())).unwrap();

    match fetcher.fetch_page(&url).await {
        Err(FetchError::Exhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(last, AttemptFailure::Timeout(_)));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}
