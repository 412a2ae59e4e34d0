//! Trending topics ("gündem").

use std::collections::HashSet;

use anyhow::Result;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::constants::{MAX_TRENDING_TOPICS, NON_TOPIC_SLUGS};
use crate::pipeline::text::normalize_whitespace;
use crate::pipeline::PageSource;
use crate::topic::TopicRef;

const TRENDING_PATH: &str = "/basliklar/gundem";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingTopic {
    pub title: String,
    pub slug: String,
    pub id: u64,
    pub url: String,
    pub entry_count: Option<u32>,
}

/// Fetch and parse the trending list, trying the site root when the
/// dedicated page cannot be fetched.
///
/// # Errors
///
/// Returns an error when neither page can be fetched.
pub async fn fetch_trending(source: &dyn PageSource, site: &Url) -> Result<Vec<TrendingTopic>> {
    let trending_url = site.join(TRENDING_PATH)?;
    let html = match source.fetch_page(&trending_url).await {
        Ok(html) => html,
        Err(e) => {
            warn!(error = %e, "Trending page unavailable; trying the front page");
            source.fetch_page(&site.join("/")?).await?
        }
    };

    let topics = parse_trending(&html, site);
    info!(count = topics.len(), "Parsed trending topics");
    Ok(topics)
}

/// Parse trending topics from a page of the site.
#[must_use]
pub fn parse_trending(html: &str, site: &Url) -> Vec<TrendingTopic> {
    let document = Html::parse_document(html);
    let item_selector = Selector::parse("ul.topic-list li").expect("Invalid selector");
    let link_selector = Selector::parse("a[href]").expect("Invalid selector");

    let mut seen = HashSet::new();
    let mut topics = Vec::new();

    for item in document.select(&item_selector) {
        if is_hidden_or_sponsored(&item) {
            continue;
        }
        if let Some(link) = item.select(&link_selector).next() {
            push_topic(&mut topics, &mut seen, &link, site);
        }
    }

    if topics.is_empty() {
        for link in document.select(&link_selector) {
            push_topic(&mut topics, &mut seen, &link, site);
        }
    }

    topics.truncate(MAX_TRENDING_TOPICS);
    topics
}

fn is_hidden_or_sponsored(item: &ElementRef<'_>) -> bool {
    let el = item.value();
    let style = el.attr("style").unwrap_or_default().replace(' ', "");
    style.contains("display:none")
        || el.classes().any(|c| c.contains("sponsored"))
        || el.attr("id").is_some_and(|id| id.contains("sponsored"))
}

fn push_topic(
    topics: &mut Vec<TrendingTopic>,
    seen: &mut HashSet<u64>,
    link: &ElementRef<'_>,
    site: &Url,
) {
    let Some(href) = link.value().attr("href") else {
        return;
    };
    let Ok(topic) = TopicRef::parse(href) else {
        return;
    };
    if NON_TOPIC_SLUGS.contains(&topic.slug.as_str()) || !seen.insert(topic.id) {
        return;
    }

    let small_selector = Selector::parse("small").expect("Invalid selector");
    let small_text = link
        .select(&small_selector)
        .next()
        .map(|small| small.text().collect::<String>())
        .unwrap_or_default();
    let entry_count = small_text.trim().parse().ok();

    let mut text: String = link.text().collect();
    if !small_text.is_empty() {
        if let Some(at) = text.rfind(&small_text) {
            text.replace_range(at..at + small_text.len(), "");
        }
    }
    let title = normalize_whitespace(&text);
    if title.is_empty() {
        return;
    }

    let url = topic
        .base_url(site)
        .map_or_else(|_| topic.path(), String::from);
    topics.push(TrendingTopic {
        title,
        slug: topic.slug,
        id: topic.id,
        url,
        entry_count,
    });
}
