use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants;
use crate::pipeline::extractor::FallbackWeights;
use crate::pipeline::fetcher::{ClientProfile, RetryPolicy};
use crate::pipeline::orchestrator::ScrapeSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Web Server
    pub web_host: String,
    pub web_port: u16,

    // Target site
    pub site_base_url: Url,

    // Fetching
    pub fetch_timeout: Duration,
    pub retries_per_profile: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter_min: Duration,
    pub backoff_jitter_max: Duration,
    pub desktop_user_agent: String,
    pub mobile_user_agent: String,

    // Request budget
    pub request_budget: u32,
    pub discovery_budget: u32,
    pub page_delay_min: Duration,
    pub page_delay_max: Duration,

    // Extraction
    pub extractor_backend: ExtractorBackend,
    pub fallback_min_score: u32,
    pub fallback_context_chars: usize,

    // Summarizer
    pub ai_api_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_models: Vec<String>,
    pub ai_timeout: Duration,
    pub ai_max_input_chars: usize,

    // Responses
    pub default_topic_limit: usize,
    pub sample_entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorBackend {
    /// Pattern scan over the raw markup
    Regex,
    /// Parsed DOM with CSS selectors
    Dom,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Web Server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8787)?,

            // Target site
            site_base_url: parse_site_url(&env_or_default(
                "SITE_BASE_URL",
                "https://eksisozluk.com",
            ))?,

            // Fetching
            fetch_timeout: Duration::from_secs(parse_env_u64("FETCH_TIMEOUT_SECS", 25)?),
            retries_per_profile: parse_env_u32("RETRIES_PER_PROFILE", 2)?,
            backoff_base: Duration::from_millis(parse_env_u64("BACKOFF_BASE_MS", 800)?),
            backoff_max: Duration::from_millis(parse_env_u64("BACKOFF_MAX_MS", 2500)?),
            backoff_jitter_min: Duration::from_millis(parse_env_u64("BACKOFF_JITTER_MIN_MS", 50)?),
            backoff_jitter_max: Duration::from_millis(parse_env_u64(
                "BACKOFF_JITTER_MAX_MS",
                250,
            )?),
            desktop_user_agent: env_or_default("DESKTOP_USER_AGENT", constants::DESKTOP_USER_AGENT),
            mobile_user_agent: env_or_default("MOBILE_USER_AGENT", constants::MOBILE_USER_AGENT),

            // Request budget
            request_budget: parse_env_u32("REQUEST_BUDGET", 48)?,
            discovery_budget: parse_env_u32("DISCOVERY_BUDGET", 8)?,
            page_delay_min: Duration::from_millis(parse_env_u64("PAGE_DELAY_MIN_MS", 80)?),
            page_delay_max: Duration::from_millis(parse_env_u64("PAGE_DELAY_MAX_MS", 200)?),

            // Extraction
            extractor_backend: parse_extractor_backend(&env_or_default(
                "EXTRACTOR_BACKEND",
                "regex",
            ))?,
            fallback_min_score: parse_env_u32("FALLBACK_MIN_SCORE", 10)?,
            fallback_context_chars: parse_env_usize("FALLBACK_CONTEXT_CHARS", 3000)?,

            // Summarizer
            ai_api_url: optional_env("AI_API_URL"),
            ai_api_key: optional_env("AI_API_KEY"),
            ai_models: parse_list(&env_or_default("AI_MODELS", "@cf/meta/llama-3-8b-instruct")),
            ai_timeout: Duration::from_secs(parse_env_u64("AI_TIMEOUT_SECS", 60)?),
            ai_max_input_chars: parse_env_usize("AI_MAX_INPUT_CHARS", 25_000)?,

            // Responses
            default_topic_limit: parse_env_usize("DEFAULT_TOPIC_LIMIT", 50)?,
            sample_entries: parse_env_usize("SAMPLE_ENTRIES", 5)?,
        })
    }

    /// Configuration for tests: no delays, short timeouts, local site.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            site_base_url: Url::parse("http://127.0.0.1/").expect("static URL"),
            fetch_timeout: Duration::from_secs(2),
            retries_per_profile: 2,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
            backoff_jitter_min: Duration::ZERO,
            backoff_jitter_max: Duration::ZERO,
            desktop_user_agent: constants::DESKTOP_USER_AGENT.to_string(),
            mobile_user_agent: constants::MOBILE_USER_AGENT.to_string(),
            request_budget: 48,
            discovery_budget: 8,
            page_delay_min: Duration::ZERO,
            page_delay_max: Duration::ZERO,
            extractor_backend: ExtractorBackend::Regex,
            fallback_min_score: 10,
            fallback_context_chars: 3000,
            ai_api_url: None,
            ai_api_key: None,
            ai_models: vec!["test-model".to_string()],
            ai_timeout: Duration::from_secs(2),
            ai_max_input_chars: 25_000,
            default_topic_limit: 50,
            sample_entries: 5,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_budget == 0 {
            return Err(invalid("REQUEST_BUDGET", "must be at least 1"));
        }
        if self.discovery_budget == 0 || self.discovery_budget > self.request_budget {
            return Err(invalid(
                "DISCOVERY_BUDGET",
                "must be between 1 and REQUEST_BUDGET",
            ));
        }
        if self.retries_per_profile == 0 {
            return Err(invalid("RETRIES_PER_PROFILE", "must be at least 1"));
        }
        if self.backoff_jitter_min > self.backoff_jitter_max {
            return Err(invalid(
                "BACKOFF_JITTER_MIN_MS",
                "cannot exceed BACKOFF_JITTER_MAX_MS",
            ));
        }
        if self.page_delay_min > self.page_delay_max {
            return Err(invalid("PAGE_DELAY_MIN_MS", "cannot exceed PAGE_DELAY_MAX_MS"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(invalid("FETCH_TIMEOUT_SECS", "must be at least 1"));
        }
        if self.ai_api_url.is_some() && self.ai_models.is_empty() {
            return Err(invalid("AI_MODELS", "at least one model is required with AI_API_URL"));
        }
        Ok(())
    }

    /// Retry schedule for a single page fetch.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries_per_profile: self.retries_per_profile,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
            jitter_min: self.backoff_jitter_min,
            jitter_max: self.backoff_jitter_max,
        }
    }

    /// Client identities in the order they are tried.
    #[must_use]
    pub fn client_profiles(&self) -> Vec<ClientProfile> {
        vec![
            ClientProfile::desktop(&self.desktop_user_agent, &self.site_base_url),
            ClientProfile::mobile(&self.mobile_user_agent, &self.site_base_url),
        ]
    }

    #[must_use]
    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            request_budget: self.request_budget,
            discovery_budget: self.discovery_budget,
            page_delay_min: self.page_delay_min,
            page_delay_max: self.page_delay_max,
        }
    }

    #[must_use]
    pub fn fallback_weights(&self) -> FallbackWeights {
        FallbackWeights {
            min_score: self.fallback_min_score,
            context_chars: self.fallback_context_chars,
            ..FallbackWeights::default()
        }
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_site_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        name: "SITE_BASE_URL".to_string(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("SITE_BASE_URL", "must be an http(s) URL"));
    }
    Ok(url)
}

fn parse_extractor_backend(value: &str) -> Result<ExtractorBackend, ConfigError> {
    match value.to_lowercase().as_str() {
        "regex" => Ok(ExtractorBackend::Regex),
        "dom" => Ok(ExtractorBackend::Dom),
        _ => Err(ConfigError::InvalidValue {
            name: "EXTRACTOR_BACKEND".to_string(),
            message: format!("must be 'regex' or 'dom', got '{value}'"),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_parse_extractor_backend() {
        assert_eq!(parse_extractor_backend("regex").unwrap(), ExtractorBackend::Regex);
        assert_eq!(parse_extractor_backend("DOM").unwrap(), ExtractorBackend::Dom);
        assert!(parse_extractor_backend("xpath").is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_site_url() {
        assert!(parse_site_url("https://eksisozluk.com").is_ok());
        assert!(parse_site_url("ftp://eksisozluk.com").is_err());
        assert!(parse_site_url("not a url").is_err());
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = Config::for_testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_profiles().len(), 2);
    }

    #[test]
    fn test_validate_rejects_discovery_over_budget() {
        let mut config = Config::for_testing();
        config.discovery_budget = config.request_budget + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults_and_overrides() {
        std::env::remove_var("REQUEST_BUDGET");
        std::env::set_var("RETRIES_PER_PROFILE", "3");
        std::env::set_var("AI_MODELS", "model-a,model-b");

        let config = Config::from_env().unwrap();
        assert_eq!(config.request_budget, 48);
        assert_eq!(config.retries_per_profile, 3);
        assert_eq!(config.ai_models, vec!["model-a", "model-b"]);
        assert_eq!(config.site_base_url.as_str(), "https://eksisozluk.com/");

        std::env::remove_var("RETRIES_PER_PROFILE");
        std::env::remove_var("AI_MODELS");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_integer() {
        std::env::set_var("REQUEST_BUDGET", "lots");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ParseInt { .. })
        ));
        std::env::remove_var("REQUEST_BUDGET");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_backend() {
        std::env::set_var("EXTRACTOR_BACKEND", "xpath");
        let result = Config::from_env();
        std::env::remove_var("EXTRACTOR_BACKEND");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name, .. }) if name == "EXTRACTOR_BACKEND"
        ));
    }
}
