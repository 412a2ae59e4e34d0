//! Locating entry content blocks in a topic page.
//!
//! [`BlockScanner`] is the seam between page markup and entry assembly: it
//! turns one page into positioned text blocks with whatever id and metadata
//! could be found next to them. Two implementations exist, a pattern scan
//! over raw markup and a DOM walk.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::text::{ceil_boundary, clean_entry_text, decode_label, floor_boundary, normalize_whitespace};

const PINNED_CONTAINER_ID: &str = "pinned-entry";
const LIST_CONTAINER_ID: &str = "entry-item-list";
const ID_LOOKBEHIND: usize = 20_000;
const ID_LOOKAHEAD: usize = 2_000;
const META_LOOKBEHIND: usize = 500;
const META_LOOKAHEAD: usize = 3_000;

static OPEN_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("valid open tag regex"));
static ANY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>").expect("valid tag regex"));
static CLASS_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bclass\s*=\s*["']([^"']*)["']"#).expect("valid class regex")
});
static CONTAINER_ID_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bid\s*=\s*["'](pinned-entry|entry-item-list)["']"#)
        .expect("valid container regex")
});
static ID_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:id\s*=\s*["']entry-(\d+)["']|data-id\s*=\s*["'](\d+)["'])"#)
        .expect("valid id marker regex")
});

static AUTHOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)data-author\s*=\s*["']([^"']+)["']"#).expect("valid author regex"),
        Regex::new(r#"(?is)<a\b[^>]*class\s*=\s*["'][^"']*\bentry-author\b[^"']*["'][^>]*>([^<]+)</a>"#)
            .expect("valid author regex"),
        Regex::new(r#"(?is)<a\b[^>]*href\s*=\s*["'][^"']*/biri/[^"']+["'][^>]*>([^<]+)</a>"#)
            .expect("valid author regex"),
    ]
});
static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?is)<a\b[^>]*class\s*=\s*["'][^"']*\bentry-date\b[^"']*["'][^>]*>([^<]+)</a>"#)
            .expect("valid date regex"),
        Regex::new(r#"(?i)data-date\s*=\s*["']([^"']+)["']"#).expect("valid date regex"),
        Regex::new(r"(?is)<time\b[^>]*>([^<]+)</time>").expect("valid date regex"),
    ]
});
static FAVORITE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)data-favorite-count\s*=\s*["'](\d+)["']"#).expect("valid favorite regex"),
        Regex::new(r#"(?is)class\s*=\s*["'][^"']*\bfavorite-count\b[^"']*["'][^>]*>\s*(\d+)"#)
            .expect("valid favorite regex"),
    ]
});

/// Best-effort metadata found next to a content block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub author: Option<String>,
    pub date: Option<String>,
    pub favorite_count: Option<u32>,
}

/// One content block of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    /// Platform id found near the block, if any.
    pub id: Option<String>,
    /// Whether the block came from the pinned-entry container.
    pub pinned: bool,
    /// Cleaned plain text; may be empty.
    pub text: String,
    /// Document position used for ordering.
    pub position: usize,
    pub meta: EntryMeta,
}

/// Turns a page into positioned content blocks.
pub trait BlockScanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blocks of the pinned container (flagged `pinned`) followed by the
    /// blocks of the entry list, or of the whole page when no list exists.
    fn scan(&self, html: &str) -> Vec<ContentBlock>;
}

/// Pattern scan over raw markup. Tolerates truncated and malformed pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexScanner;

impl BlockScanner for RegexScanner {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn scan(&self, html: &str) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();

        let pinned = find_container(html, PINNED_CONTAINER_ID);
        if let Some(span) = &pinned {
            let first = content_spans(html, span.clone(), has_content_token)
                .into_iter()
                .map(|raw| block_from_span(html, span, &raw, true))
                .find(|block| !block.text.is_empty());
            blocks.extend(first);
        }

        let list = find_container(html, LIST_CONTAINER_ID).unwrap_or(0..html.len());
        for raw in content_spans(html, list.clone(), has_content_token) {
            if pinned.as_ref().is_some_and(|p| p.contains(&raw.start)) {
                continue;
            }
            blocks.push(block_from_span(html, &list, &raw, false));
        }

        blocks
    }
}

/// A content element located in the markup.
#[derive(Debug, Clone)]
pub(crate) struct RawBlock {
    /// Offset of the opening tag.
    pub start: usize,
    /// Inner markup between the opening and closing tags.
    pub inner: Range<usize>,
    /// Offset just past the closing tag.
    pub end: usize,
}

fn has_content_token(class: &str) -> bool {
    class.split_whitespace().any(|token| token == "content")
}

fn block_from_span(html: &str, scope: &Range<usize>, raw: &RawBlock, pinned: bool) -> ContentBlock {
    let (id, marker) = resolve_id(html, scope, raw);
    ContentBlock {
        id,
        pinned,
        text: clean_entry_text(&html[raw.inner.clone()]),
        position: raw.start,
        meta: extract_meta(meta_context(html, raw, marker)),
    }
}

/// Inner range of the element whose `id` is `id`, preferring `ul` then `div`.
pub(crate) fn find_container(html: &str, id: &str) -> Option<Range<usize>> {
    let mut candidates: Vec<(u8, String, usize, usize)> = Vec::new();

    for caps in CONTAINER_ID_ATTR.captures_iter(html) {
        if !caps[1].eq_ignore_ascii_case(id) {
            continue;
        }
        let attr = caps.get(0)?;
        let Some(open_start) = html[..attr.start()].rfind('<') else {
            continue;
        };
        let Some(tag) = OPEN_TAG.captures(&html[open_start..]) else {
            continue;
        };
        let whole = tag.get(0)?;
        if whole.start() != 0 || open_start + whole.end() < attr.end() {
            continue;
        }
        let name = tag[1].to_ascii_lowercase();
        let rank = match name.as_str() {
            "ul" => 0,
            "div" => 1,
            _ => 2,
        };
        candidates.push((rank, name, open_start, open_start + whole.end()));
    }

    candidates.sort_by_key(|(rank, _, start, _)| (*rank, *start));
    let (_, name, _, inner_start) = candidates.into_iter().next()?;
    let (inner_end, _) = matching_close(html, &name, inner_start, html.len());
    Some(inner_start..inner_end)
}

/// Elements within `scope` whose class list satisfies `accept`, in document
/// order. Blocks nested in an earlier accepted block are skipped.
pub(crate) fn content_spans(
    html: &str,
    scope: Range<usize>,
    accept: impl Fn(&str) -> bool,
) -> Vec<RawBlock> {
    let mut spans = Vec::new();
    let mut cursor = scope.start;

    for caps in OPEN_TAG.captures_iter(&html[scope.clone()]) {
        let Some(whole) = caps.get(0) else { continue };
        let start = scope.start + whole.start();
        if start < cursor {
            continue;
        }
        let attrs = &caps[2];
        if attrs.trim_end().ends_with('/') {
            continue;
        }
        let Some(class) = CLASS_ATTR.captures(attrs) else {
            continue;
        };
        if !accept(&class[1]) {
            continue;
        }

        let inner_start = scope.start + whole.end();
        let (inner_end, end) = matching_close(html, &caps[1], inner_start, scope.end);
        spans.push(RawBlock {
            start,
            inner: inner_start..inner_end,
            end,
        });
        cursor = end;
    }

    spans
}

/// Find the close tag balancing an open `tag` whose content starts at
/// `from`. Returns `(inner_end, close_end)`; an unclosed element runs to `limit`.
fn matching_close(html: &str, tag: &str, from: usize, limit: usize) -> (usize, usize) {
    let mut depth = 1usize;
    for caps in ANY_TAG.captures_iter(&html[from..limit]) {
        if !caps[2].eq_ignore_ascii_case(tag) {
            continue;
        }
        let Some(whole) = caps.get(0) else { continue };
        if &caps[1] == "/" {
            depth -= 1;
            if depth == 0 {
                return (from + whole.start(), from + whole.end());
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    (limit, limit)
}

/// Resolve the id of a block: a marker on its own opening tag, else the
/// nearest marker before it within `scope`, else the first marker shortly
/// after it.
///
/// Also returns the offset of the marker's tag unless it came after the block.
pub(crate) fn resolve_id(
    html: &str,
    scope: &Range<usize>,
    raw: &RawBlock,
) -> (Option<String>, Option<usize>) {
    if let Some(caps) = ID_MARKER.captures(&html[raw.start..raw.inner.start]) {
        return (marker_id(&caps), Some(raw.start));
    }

    let back_start = floor_boundary(html, raw.start.saturating_sub(ID_LOOKBEHIND)).max(scope.start);
    if let Some(caps) = ID_MARKER.captures_iter(&html[back_start..raw.start]).last() {
        let marker = caps.get(0).map_or(raw.start, |m| back_start + m.start());
        let tag_start = html[..marker].rfind('<').unwrap_or(marker);
        return (marker_id(&caps), Some(tag_start));
    }

    let ahead_end = ceil_boundary(html, raw.end + ID_LOOKAHEAD).min(scope.end.max(raw.end));
    let id = ID_MARKER
        .captures(&html[raw.end..ahead_end])
        .and_then(|caps| marker_id(&caps));
    (id, None)
}

fn marker_id(caps: &regex::Captures<'_>) -> Option<String> {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Markup around a block that belongs to the same entry.
fn meta_context<'a>(html: &'a str, raw: &RawBlock, marker: Option<usize>) -> &'a str {
    let start = marker.unwrap_or_else(|| floor_boundary(html, raw.start.saturating_sub(META_LOOKBEHIND)));
    let limit = ceil_boundary(html, raw.end + META_LOOKAHEAD);
    let end = ID_MARKER
        .find(&html[raw.end..limit])
        .map_or(limit, |m| html[..raw.end + m.start()].rfind('<').unwrap_or(raw.end + m.start()))
        .max(raw.end);
    &html[start..end]
}

/// Scrape author, date and favorite count from markup near an entry.
pub(crate) fn extract_meta(context: &str) -> EntryMeta {
    let first = |patterns: &[Regex]| {
        patterns.iter().find_map(|pattern| {
            pattern
                .captures(context)
                .and_then(|caps| caps.get(1))
                .map(|m| decode_label(m.as_str()))
                .filter(|value| !value.is_empty())
        })
    };

    EntryMeta {
        author: first(&AUTHOR_PATTERNS),
        date: first(&DATE_PATTERNS),
        favorite_count: first(&FAVORITE_PATTERNS).and_then(|count| count.parse().ok()),
    }
}

/// DOM walk using CSS selectors; decodes entities through the HTML parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomScanner;

impl BlockScanner for DomScanner {
    fn name(&self) -> &'static str {
        "dom"
    }

    fn scan(&self, html: &str) -> Vec<ContentBlock> {
        let document = Html::parse_document(html);
        let content_selector = Selector::parse(".content").expect("Invalid selector");
        let list_selector = Selector::parse("#entry-item-list").expect("Invalid selector");

        let mut blocks = Vec::new();
        let mut pinned_found = false;
        let has_list = document.select(&list_selector).next().is_some();

        for (position, element) in document.select(&content_selector).enumerate() {
            if has_ancestor_class(&element, "content") {
                continue;
            }
            let pinned = has_ancestor_id(&element, PINNED_CONTAINER_ID);
            if pinned {
                if pinned_found {
                    continue;
                }
            } else if has_list && !has_ancestor_id(&element, LIST_CONTAINER_ID) {
                continue;
            }

            let text = element_text(&element);
            if pinned {
                if text.is_empty() {
                    continue;
                }
                pinned_found = true;
            }

            let owner = entry_owner(&element);
            blocks.push(ContentBlock {
                id: owner.as_ref().and_then(owner_id),
                pinned,
                text,
                position,
                meta: owner.as_ref().map(owner_meta).unwrap_or_default(),
            });
        }

        blocks
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        if let Some(el) = node.value().as_element() {
            if matches!(el.name(), "br" | "p" | "div" | "li" | "blockquote") {
                text.push('\n');
            }
        } else if let Some(t) = node.value().as_text() {
            let in_script = node
                .parent()
                .and_then(|parent| parent.value().as_element().map(|el| el.name()))
                .is_some_and(|name| matches!(name, "script" | "style"));
            if !in_script {
                text.push_str(t);
            }
        }
    }
    normalize_whitespace(&text)
}

fn has_ancestor_id(element: &ElementRef<'_>, id: &str) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().id() == Some(id))
}

fn has_ancestor_class(element: &ElementRef<'_>, class: &str) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().classes().any(|c| c == class))
}

/// The element itself or its nearest ancestor carrying an entry id.
fn entry_owner<'a>(element: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .find(|candidate| owner_id(candidate).is_some())
}

fn owner_id(owner: &ElementRef<'_>) -> Option<String> {
    let el = owner.value();
    el.attr("data-id")
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .or_else(|| {
            el.id()
                .and_then(|id| id.strip_prefix("entry-"))
                .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(ToString::to_string)
}

fn owner_meta(owner: &ElementRef<'_>) -> EntryMeta {
    let author_selector = Selector::parse(".entry-author").expect("Invalid selector");
    let date_selector = Selector::parse(".entry-date").expect("Invalid selector");
    let el = owner.value();

    let text_of = |selector: &Selector| {
        owner
            .select(selector)
            .next()
            .map(|node| normalize_whitespace(&node.text().collect::<String>()))
            .filter(|value| !value.is_empty())
    };

    EntryMeta {
        author: el
            .attr("data-author")
            .map(normalize_whitespace)
            .filter(|value| !value.is_empty())
            .or_else(|| text_of(&author_selector)),
        date: text_of(&date_selector).or_else(|| el.attr("data-date").map(normalize_whitespace)),
        favorite_count: el.attr("data-favorite-count").and_then(|c| c.trim().parse().ok()),
    }
}
