//! The pagination and extraction pipeline.

pub mod blocks;
pub mod discovery;
pub mod extractor;
pub mod fetcher;
pub mod orchestrator;
pub mod text;

use thiserror::Error;

pub use blocks::{BlockScanner, ContentBlock, DomScanner, EntryMeta, RegexScanner};
pub use discovery::{discover_last_page, PageDiscovery, RequestBudget};
pub use extractor::{Entry, EntryExtractor, FallbackWeights};
pub use fetcher::{AttemptFailure, ClientProfile, FetchError, HttpFetcher, PageSource, RetryPolicy, RetryState};
pub use orchestrator::{ScrapeOutcome, ScrapeSettings, TopicScraper};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("failed to fetch the first page: {0}")]
    FirstPage(#[source] FetchError),
    #[error("request budget of {0} outbound calls is exhausted")]
    BudgetExhausted(u32),
}
