//! Shared constants used across the application.

/// User agent of the desktop client profile, tried first.
pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Mobile browser user agent used by the fallback mobile profile.
pub const MOBILE_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13; Pixel 7 Pro) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

pub const ACCEPT_LANGUAGE: &str = "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7";

/// Author shown when no author markup is found near an entry.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Synthetic id given to the topic's pinned entry.
pub const PINNED_ENTRY_ID: &str = "pinned";

/// Query parameter the site uses for pagination.
pub const PAGE_PARAM: &str = "p";

/// Body markers that label a non-200 response as a bot challenge.
pub const CHALLENGE_MARKERS: &[&str] = &["cf-chl", "challenge-platform"];

/// Lower-cased markers of an interstitial served with status 200. Ordinary
/// pages also load `challenge-platform` scripts, so these are narrower.
pub const INTERSTITIAL_MARKERS: &[&str] = &["window._cf_chl_opt", "<title>just a moment"];

/// Markers of advertising blocks ignored by the broad fallback scan.
pub const AD_MARKERS: &[&str] = &["sponsored", "advertisement", "doubleclick", "adsbygoogle"];

/// Pages shorter than this are treated as empty.
pub const MIN_HTML_LEN: usize = 100;

/// Topic slugs on the trending page that are site pages, not discussions.
pub const NON_TOPIC_SLUGS: &[&str] = &["sozluk-kurallari", "sozluk-is-ilanlari", "kariyer"];

/// Maximum number of trending topics returned.
pub const MAX_TRENDING_TOPICS: usize = 30;

/// Entries included in a summarization prompt.
pub const MAX_SUMMARY_ENTRIES: usize = 100;
