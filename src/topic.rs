//! Topic references and pagination URLs.
//!
//! A topic lives at `/{slug}--{id}`; its pages are the same path with a
//! `p` query parameter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::constants::PAGE_PARAM;

static TOPIC_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)--(\d+)$").expect("valid topic segment regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("invalid topic URL format: {0}")]
    InvalidUrlFormat(String),
}

/// A topic identified by its slug and numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicRef {
    pub slug: String,
    pub id: u64,
}

impl TopicRef {
    /// Parse a topic from a full URL, a path, or a bare `slug--id`.
    ///
    /// Query strings and fragments are ignored.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::InvalidUrlFormat` when no path segment has the
    /// `slug--id` shape.
    pub fn parse(input: &str) -> Result<Self, TopicError> {
        let input = input.trim();
        let path = if input.contains("://") {
            Url::parse(input)
                .map_err(|_| TopicError::InvalidUrlFormat(input.to_string()))?
                .path()
                .to_string()
        } else {
            input
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string()
        };

        path.split('/')
            .filter(|segment| !segment.is_empty())
            .find_map(parse_segment)
            .ok_or_else(|| TopicError::InvalidUrlFormat(input.to_string()))
    }

    /// `/{slug}--{id}`
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}--{}", self.slug, self.id)
    }

    /// The topic's first-page URL on `site`, without a page parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if `site` cannot carry a path.
    pub fn base_url(&self, site: &Url) -> Result<Url, TopicError> {
        let mut url = site.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| TopicError::InvalidUrlFormat(self.path()))?
            .clear()
            .push(&format!("{}--{}", self.slug, self.id));
        Ok(url)
    }
}

fn parse_segment(segment: &str) -> Option<TopicRef> {
    let segment = urlencoding::decode(segment).ok()?;
    let caps = TOPIC_SEGMENT.captures(&segment)?;
    let id = caps.get(2)?.as_str().parse().ok()?;
    Some(TopicRef {
        slug: caps.get(1)?.as_str().to_string(),
        id,
    })
}

/// Resolve a user-supplied topic URL against the configured site.
///
/// Only the topic path and non-pagination query parameters are kept, so
/// requests always go to `site` whatever host the caller supplied.
///
/// # Errors
///
/// Returns `TopicError::InvalidUrlFormat` if `input` is not a topic URL.
pub fn resolve_topic_url(input: &str, site: &Url) -> Result<(TopicRef, Url), TopicError> {
    let topic = TopicRef::parse(input)?;
    let mut base = topic.base_url(site)?;

    let query = input
        .split_once('?')
        .map(|(_, rest)| rest.split('#').next().unwrap_or_default())
        .unwrap_or_default();
    if !query.is_empty() {
        let kept: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| key != PAGE_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        if !kept.is_empty() {
            base.query_pairs_mut().extend_pairs(kept);
        }
    }

    Ok((topic, base))
}

/// Strip the pagination parameter from a topic URL.
#[must_use]
pub fn normalize_base_url(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PAGE_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        base.set_query(None);
    } else {
        base.query_pairs_mut().clear().extend_pairs(kept);
    }
    base
}

/// URL of 1-based `page` of the topic at `base`.
#[must_use]
pub fn page_url(base: &Url, page: u32) -> Url {
    let mut url = normalize_base_url(base);
    url.query_pairs_mut()
        .append_pair(PAGE_PARAM, &page.to_string());
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let topic = TopicRef::parse("https://eksisozluk.com/pena--31782?p=4&a=popular").unwrap();
        assert_eq!(topic.slug, "pena");
        assert_eq!(topic.id, 31782);
    }

    #[test]
    fn test_parse_path_and_bare_segment() {
        assert_eq!(
            TopicRef::parse("/kedi-besleme-rehberi--7001234?p=2").unwrap(),
            TopicRef {
                slug: "kedi-besleme-rehberi".to_string(),
                id: 7_001_234
            }
        );
        assert_eq!(TopicRef::parse("foo--123").unwrap().id, 123);
    }

    #[test]
    fn test_parse_slug_containing_separator() {
        let topic = TopicRef::parse("/a--b--99").unwrap();
        assert_eq!(topic.slug, "a--b");
        assert_eq!(topic.id, 99);
    }

    #[test]
    fn test_parse_rejects_non_topic_urls() {
        for input in [
            "https://eksisozluk.com/",
            "https://eksisozluk.com/basliklar/gundem",
            "foo-123",
            "foo--12a",
            "--123",
            "",
        ] {
            assert!(
                matches!(TopicRef::parse(input), Err(TopicError::InvalidUrlFormat(_))),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_base_url_reencodes_decoded_slug() {
        let site = Url::parse("https://eksisozluk.com/").unwrap();
        let topic = TopicRef::parse("/neden%3F-%23etiket--5").unwrap();
        assert_eq!(topic.slug, "neden?-#etiket");

        let base = topic.base_url(&site).unwrap();
        assert_eq!(base.as_str(), "https://eksisozluk.com/neden%3F-%23etiket--5");
        assert_eq!(base.query(), None);
        assert_eq!(base.fragment(), None);
        assert_eq!(TopicRef::parse(base.as_str()).unwrap(), topic);
    }

    #[test]
    fn test_normalize_strips_only_page_param() {
        let url = Url::parse("https://eksisozluk.com/foo--1?p=3&a=popular#top").unwrap();
        assert_eq!(
            normalize_base_url(&url).as_str(),
            "https://eksisozluk.com/foo--1?a=popular"
        );

        let url = Url::parse("https://eksisozluk.com/foo--1?p=3").unwrap();
        assert_eq!(normalize_base_url(&url).as_str(), "https://eksisozluk.com/foo--1");
    }

    #[test]
    fn test_page_url_replaces_existing_page() {
        let base = Url::parse("https://eksisozluk.com/foo--1?p=9").unwrap();
        assert_eq!(page_url(&base, 2).as_str(), "https://eksisozluk.com/foo--1?p=2");
    }

    #[test]
    fn test_resolve_topic_url_uses_configured_site() {
        let site = Url::parse("http://127.0.0.1:9000").unwrap();
        let (topic, base) =
            resolve_topic_url("https://eksisozluk.com/foo--123?p=5&a=nice", &site).unwrap();
        assert_eq!(topic.id, 123);
        assert_eq!(base.as_str(), "http://127.0.0.1:9000/foo--123?a=nice");
    }
}
