//! Resilient page fetching.
//!
//! A page fetch walks through the configured client profiles in order,
//! giving each a few attempts with exponential backoff. The progression is
//! a small state machine ([`RetryState`]) driven by [`RetryPolicy`].

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::constants::{ACCEPT_HTML, ACCEPT_LANGUAGE, CHALLENGE_MARKERS, INTERSTITIAL_MARKERS};

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("bot challenge page (HTTP {0})")]
    Challenge(u16),
    #[error("empty response body")]
    EmptyBody,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("no client profiles configured")]
    NoProfiles,
    #[error("giving up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: AttemptFailure,
    },
}

/// Source of page HTML.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page, retrying internally.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Exhausted` once every attempt has failed.
    async fn fetch_page(&self, url: &Url) -> Result<String, FetchError>;
}

/// A named set of request headers presented to the site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub name: String,
    pub headers: Vec<(String, String)>,
}

impl ClientProfile {
    /// Windows Chrome identity.
    #[must_use]
    pub fn desktop(user_agent: &str, site: &Url) -> Self {
        let mut headers = vec![
            ("user-agent".to_string(), user_agent.to_string()),
            (
                "sec-ch-ua".to_string(),
                r#""Not_A Brand";v="8", "Chromium";v="120", "Google Chrome";v="120""#.to_string(),
            ),
            ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
            ("sec-ch-ua-platform".to_string(), r#""Windows""#.to_string()),
        ];
        headers.extend(common_headers(site));
        Self {
            name: "desktop".to_string(),
            headers,
        }
    }

    /// Android Chrome identity.
    #[must_use]
    pub fn mobile(user_agent: &str, site: &Url) -> Self {
        let mut headers = vec![
            ("user-agent".to_string(), user_agent.to_string()),
            ("sec-ch-ua-mobile".to_string(), "?1".to_string()),
            ("sec-ch-ua-platform".to_string(), r#""Android""#.to_string()),
        ];
        headers.extend(common_headers(site));
        Self {
            name: "mobile".to_string(),
            headers,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn common_headers(site: &Url) -> Vec<(String, String)> {
    let referer = site.join("/").map_or_else(|_| site.to_string(), |u| u.to_string());
    [
        ("accept", ACCEPT_HTML),
        ("accept-language", ACCEPT_LANGUAGE),
        ("cache-control", "no-cache"),
        ("pragma", "no-cache"),
        ("sec-fetch-dest", "document"),
        ("sec-fetch-mode", "navigate"),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-user", "?1"),
        ("upgrade-insecure-requests", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .chain(std::iter::once(("referer".to_string(), referer)))
    .collect()
}

/// Where a page fetch stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// About to send attempt `attempt` (1-based) with profile `profile`.
    Attempting { profile: usize, attempt: u32 },
    /// Waiting `delay` before the given attempt.
    Retrying {
        profile: usize,
        attempt: u32,
        delay: Duration,
    },
    Succeeded,
    Exhausted,
}

/// Attempts per profile and the backoff between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries_per_profile: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn start(&self) -> RetryState {
        RetryState::Attempting {
            profile: 0,
            attempt: 1,
        }
    }

    /// Next state after `state`, given whether the attempt it describes
    /// succeeded. `succeeded` is ignored outside `Attempting`.
    #[must_use]
    pub fn advance(&self, state: RetryState, succeeded: bool, profiles: usize) -> RetryState {
        match state {
            RetryState::Attempting { .. } if succeeded => RetryState::Succeeded,
            RetryState::Attempting { profile, attempt } => {
                let (profile_next, attempt_next) = if attempt < self.retries_per_profile {
                    (profile, attempt + 1)
                } else if profile + 1 < profiles {
                    (profile + 1, 1)
                } else {
                    return RetryState::Exhausted;
                };
                RetryState::Retrying {
                    profile: profile_next,
                    attempt: attempt_next,
                    delay: self.backoff(attempt),
                }
            }
            RetryState::Retrying {
                profile, attempt, ..
            } => RetryState::Attempting { profile, attempt },
            terminal => terminal,
        }
    }

    /// `min(base * 2^(attempt-1), max)` without jitter.
    #[must_use]
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff after failed attempt `attempt`, including jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max > self.jitter_min {
            rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
        } else {
            self.jitter_min
        };
        self.base_backoff(attempt) + jitter
    }

    /// Total attempts a fetch may make with `profiles` profiles.
    #[must_use]
    pub fn max_attempts(&self, profiles: usize) -> u32 {
        self.retries_per_profile
            .saturating_mul(u32::try_from(profiles).unwrap_or(u32::MAX))
    }
}

/// Whether a failed response's `body` comes from the bot challenge.
#[must_use]
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Whether a 200 `body` is a challenge interstitial instead of the page.
#[must_use]
pub fn is_interstitial(body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    INTERSTITIAL_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Judge one response: a non-blank 200 that is not an interstitial.
///
/// # Errors
///
/// Returns the kind of failure the response represents.
pub fn check_response(status: u16, body: &str) -> Result<(), AttemptFailure> {
    if status != StatusCode::OK.as_u16() {
        return Err(if is_challenge_page(body) {
            AttemptFailure::Challenge(status)
        } else {
            AttemptFailure::Status(status)
        });
    }
    if body.trim().is_empty() {
        return Err(AttemptFailure::EmptyBody);
    }
    if is_interstitial(body) {
        return Err(AttemptFailure::Challenge(status));
    }
    Ok(())
}

/// Page fetcher over HTTP with profile rotation.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    profiles: Vec<ClientProfile>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns an error if `profiles` is empty or the HTTP client cannot be built.
    pub fn new(
        profiles: Vec<ClientProfile>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        if profiles.is_empty() {
            return Err(FetchError::NoProfiles);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            profiles,
            policy,
            timeout,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            config.client_profiles(),
            config.retry_policy(),
            config.fetch_timeout,
        )
    }

    async fn attempt(&self, url: &Url, profile: &ClientProfile) -> Result<String, AttemptFailure> {
        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        for (name, value) in &profile.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| self.classify(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(&e))?;

        check_response(status.as_u16(), &body)?;
        Ok(body)
    }

    fn classify(&self, error: &reqwest::Error) -> AttemptFailure {
        if error.is_timeout() {
            AttemptFailure::Timeout(self.timeout)
        } else {
            AttemptFailure::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_page(&self, url: &Url) -> Result<String, FetchError> {
        let mut state = self.policy.start();
        let mut attempts = 0;
        let mut last = AttemptFailure::EmptyBody;

        loop {
            state = match state {
                RetryState::Attempting { profile, attempt } => {
                    let client_profile = &self.profiles[profile];
                    attempts += 1;
                    match self.attempt(url, client_profile).await {
                        Ok(body) => {
                            debug!(
                                url = %url,
                                profile = %client_profile.name,
                                attempt,
                                bytes = body.len(),
                                "Fetched page"
                            );
                            return Ok(body);
                        }
                        Err(failure) => {
                            warn!(
                                url = %url,
                                profile = %client_profile.name,
                                attempt,
                                error = %failure,
                                "Page fetch attempt failed"
                            );
                            last = failure;
                            self.policy.advance(state, false, self.profiles.len())
                        }
                    }
                }
                RetryState::Retrying { delay, .. } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    self.policy.advance(state, false, self.profiles.len())
                }
                RetryState::Succeeded | RetryState::Exhausted => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts,
                        last,
                    });
                }
            };
        }
    }
}
