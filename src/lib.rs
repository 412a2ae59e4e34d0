//! Ekşi Sözlük topic scraper library.
//!
//! Discovers how many pages a topic has, fetches them one at a time with
//! retrying client profiles, extracts the entries, and serves the result
//! (optionally summarized) over a small HTTP API.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod config;
pub mod constants;
pub mod pipeline;
pub mod summarizer;
pub mod topic;
pub mod trending;
pub mod web;
