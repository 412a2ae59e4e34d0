//! Entry extraction from a single topic page.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::blocks::{
    content_spans, extract_meta, resolve_id, BlockScanner, ContentBlock, DomScanner, RegexScanner,
};
use super::text::{ceil_boundary, clean_entry_text, floor_boundary};
use crate::config::{Config, ExtractorBackend};
use crate::constants::{AD_MARKERS, MIN_HTML_LEN, PINNED_ENTRY_ID, UNKNOWN_AUTHOR};

static AUTHOR_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)entry-author|href\s*=\s*["'][^"']*/biri/"#).expect("valid signal regex")
});
static DATE_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)entry-date|href\s*=\s*["'][^"']*/entry/\d+"#).expect("valid signal regex")
});
static FOOTER_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<footer\b|entry-footer|feedback-container|entry-info")
        .expect("valid signal regex")
});
static META_SIGNAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)entry-item|entry-meta|data-id\s*=").expect("valid signal regex")
});

/// One user post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Numeric platform id, `pinned`, or `order-N`.
    pub id: String,
    pub order: usize,
    pub content: String,
    pub author: String,
    pub date: Option<String>,
    pub favorite_count: u32,
    pub entry_url: Option<String>,
}

impl Entry {
    fn from_block(id: String, order: usize, block: ContentBlock) -> Self {
        Self {
            id,
            order,
            content: block.text,
            author: block
                .meta
                .author
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            date: block.meta.date,
            favorite_count: block.meta.favorite_count.unwrap_or(0),
            entry_url: None,
        }
    }

    /// Whether the id was assigned by the platform.
    #[must_use]
    pub fn has_numeric_id(&self) -> bool {
        !self.id.is_empty() && self.id.bytes().all(|b| b.is_ascii_digit())
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.id == PINNED_ENTRY_ID
    }
}

/// Scoring of the document-wide fallback scan.
///
/// A block is kept when the signals found within `context_chars` of it add
/// up to at least `min_score`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackWeights {
    pub author: u32,
    pub date: u32,
    pub footer: u32,
    pub entry_meta: u32,
    pub long_text: u32,
    pub short_text: u32,
    pub min_score: u32,
    pub context_chars: usize,
}

impl Default for FallbackWeights {
    fn default() -> Self {
        Self {
            author: 10,
            date: 8,
            footer: 4,
            entry_meta: 6,
            long_text: 2,
            short_text: 1,
            min_score: 10,
            context_chars: 3000,
        }
    }
}

/// Extracts entries from one page.
pub struct EntryExtractor {
    scanner: Box<dyn BlockScanner>,
    weights: FallbackWeights,
}

impl std::fmt::Debug for EntryExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryExtractor")
            .field("scanner", &self.scanner.name())
            .field("weights", &self.weights)
            .finish()
    }
}

impl Default for EntryExtractor {
    fn default() -> Self {
        Self::new(Box::new(RegexScanner), FallbackWeights::default())
    }
}

impl EntryExtractor {
    #[must_use]
    pub fn new(scanner: Box<dyn BlockScanner>, weights: FallbackWeights) -> Self {
        Self { scanner, weights }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let scanner: Box<dyn BlockScanner> = match config.extractor_backend {
            ExtractorBackend::Regex => Box::new(RegexScanner),
            ExtractorBackend::Dom => Box::new(DomScanner),
        };
        Self::new(scanner, config.fallback_weights())
    }

    /// Extract the entries of one page in page order.
    ///
    /// The pinned entry comes first. Ids are unique within the result;
    /// `order` is the index within this page only.
    #[must_use]
    pub fn extract(&self, html: &str) -> Vec<Entry> {
        if html.trim().len() < MIN_HTML_LEN {
            debug!(len = html.len(), "Page too short to contain entries");
            return Vec::new();
        }

        let entries = assemble(self.scanner.scan(html));
        if !entries.is_empty() {
            return entries;
        }

        let entries = assemble(scored_blocks(html, &self.weights));
        if !entries.is_empty() {
            debug!(
                scanner = self.scanner.name(),
                count = entries.len(),
                "Primary scan found nothing; using scored fallback"
            );
        }
        entries
    }
}

fn assemble(blocks: Vec<ContentBlock>) -> Vec<Entry> {
    let (pinned, mut regular): (Vec<_>, Vec<_>) = blocks.into_iter().partition(|b| b.pinned);
    regular.sort_by_key(|block| block.position);

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    if let Some(block) = pinned.into_iter().find(|b| !b.text.is_empty()) {
        seen.insert(PINNED_ENTRY_ID.to_string());
        entries.push(Entry::from_block(PINNED_ENTRY_ID.to_string(), 0, block));
    }

    for block in regular {
        if block.text.is_empty() {
            continue;
        }
        let id = block
            .id
            .clone()
            .unwrap_or_else(|| format!("order-{}", entries.len()));
        if !seen.insert(id.clone()) {
            debug!(id = %id, "Skipping duplicate entry on page");
            continue;
        }
        let order = entries.len();
        entries.push(Entry::from_block(id, order, block));
    }

    entries
}

/// Document-wide scan of any element whose class mentions `content`,
/// kept only when entry-like markup surrounds it.
fn scored_blocks(html: &str, weights: &FallbackWeights) -> Vec<ContentBlock> {
    let whole = 0..html.len();
    let mut blocks = Vec::new();

    for raw in content_spans(html, whole.clone(), |class| {
        class.to_ascii_lowercase().contains("content")
    }) {
        let own_markup = html[raw.start..raw.end].to_ascii_lowercase();
        if AD_MARKERS.iter().any(|marker| own_markup.contains(marker)) {
            continue;
        }

        let text = clean_entry_text(&html[raw.inner.clone()]);
        let chars = text.chars().count();
        if chars == 0 {
            continue;
        }

        let context_start = floor_boundary(html, raw.start.saturating_sub(weights.context_chars));
        let context_end = ceil_boundary(html, raw.end + weights.context_chars);
        let context = &html[context_start..context_end];

        let mut score = 0;
        if AUTHOR_SIGNAL.is_match(context) {
            score += weights.author;
        }
        if DATE_SIGNAL.is_match(context) {
            score += weights.date;
        }
        if FOOTER_SIGNAL.is_match(context) {
            score += weights.footer;
        }
        if META_SIGNAL.is_match(context) {
            score += weights.entry_meta;
        }
        if chars > 50 {
            score += weights.long_text;
        } else if chars > 10 {
            score += weights.short_text;
        }
        if score < weights.min_score {
            continue;
        }

        let (id, _) = resolve_id(html, &whole, &raw);
        let meta_end = ceil_boundary(html, raw.end + weights.context_chars.min(1500));
        blocks.push(ContentBlock {
            id,
            pinned: false,
            text,
            position: raw.start,
            meta: extract_meta(&html[floor_boundary(html, raw.start.saturating_sub(500))..meta_end]),
        });
    }

    blocks
}
