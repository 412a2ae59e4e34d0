//! Topic summaries.
//!
//! A [`TextCompleter`] writes the summary when one is configured; otherwise,
//! or when it fails, a statistical digest is produced instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::MAX_SUMMARY_ENTRIES;
use crate::pipeline::text::floor_boundary;
use crate::pipeline::Entry;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w{4,}").expect("valid word regex"));

const TOP_WORDS: usize = 10;
const ENTRY_SEPARATOR: &str = "\n\n---\n\n";
const TRUNCATION_NOTE: &str = "\n\n[... kısaltıldı ...]";
const SYSTEM_PROMPT: &str = "Sen Türkçe metinleri özetleyen yardımcı bir asistansın.";

/// Free-text completion service.
#[async_trait]
pub trait TextCompleter: Send + Sync {
    fn name(&self) -> &str;

    /// Complete `prompt`, returning the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions HTTP client trying each model in turn.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    models: Vec<String>,
}

impl ChatCompletionsClient {
    /// # Errors
    ///
    /// Returns an error if `models` is empty or the HTTP client cannot be built.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        models: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if models.is_empty() {
            bail!("At least one completion model is required");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            models,
        })
    }

    /// Build a client when `AI_API_URL` is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured client cannot be built.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        config
            .ai_api_url
            .clone()
            .map(|endpoint| {
                Self::new(
                    endpoint,
                    config.ai_api_key.clone(),
                    config.ai_models.clone(),
                    config.ai_timeout,
                )
            })
            .transpose()
    }

    async fn complete_with(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": 1000,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Completion request failed")?
            .error_for_status()
            .context("Completion endpoint returned an error status")?;
        let value: Value = response
            .json()
            .await
            .context("Completion response is not JSON")?;

        completion_text(&value).context("Completion response has no text")
    }
}

#[async_trait]
impl TextCompleter for ChatCompletionsClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        for model in &self.models {
            match self.complete_with(model, prompt).await {
                Ok(text) => {
                    debug!(model = %model, chars = text.len(), "Completion succeeded");
                    return Ok(text);
                }
                Err(e) => warn!(model = %model, error = %format!("{e:#}"), "Completion model failed"),
            }
        }
        bail!("All {} completion models failed", self.models.len())
    }
}

/// Pull generated text out of the response shapes completion APIs use.
fn completion_text(value: &Value) -> Option<String> {
    let candidates = [
        value.as_str(),
        value.pointer("/choices/0/message/content").and_then(Value::as_str),
        value.get("response").and_then(Value::as_str),
        value.pointer("/result/response").and_then(Value::as_str),
        value.get("content").and_then(Value::as_str),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(ToString::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    Ai,
    Statistical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub text: String,
    pub source: SummarySource,
}

/// Produces summaries, falling back to statistics.
#[derive(Clone)]
pub struct Summarizer {
    completer: Option<Arc<dyn TextCompleter>>,
    max_input_chars: usize,
}

impl std::fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("completer", &self.completer.as_ref().map(|c| c.name().to_string()))
            .field("max_input_chars", &self.max_input_chars)
            .finish()
    }
}

impl Summarizer {
    #[must_use]
    pub fn new(completer: Option<Arc<dyn TextCompleter>>, max_input_chars: usize) -> Self {
        Self {
            completer,
            max_input_chars,
        }
    }

    /// Summarizer that only produces statistical digests.
    #[must_use]
    pub fn statistical() -> Self {
        Self::new(None, 0)
    }

    /// Summarize `entries`. Never fails: completion problems are logged and
    /// answered with the statistical digest.
    pub async fn summarize(&self, entries: &[Entry]) -> Summary {
        if entries.is_empty() {
            return statistical_summary(entries);
        }
        let Some(completer) = &self.completer else {
            return statistical_summary(entries);
        };

        let prompt = build_prompt(entries, self.max_input_chars);
        match completer.complete(&prompt).await {
            Ok(text) => {
                info!(completer = completer.name(), entries = entries.len(), "Generated summary");
                Summary {
                    text,
                    source: SummarySource::Ai,
                }
            }
            Err(e) => {
                warn!(
                    completer = completer.name(),
                    error = %format!("{e:#}"),
                    "Summarizer unavailable; using statistical digest"
                );
                statistical_summary(entries)
            }
        }
    }
}

/// Prompt for the first entries, cut to `max_chars` of entry text.
#[must_use]
pub fn build_prompt(entries: &[Entry], max_chars: usize) -> String {
    let mut body = entries
        .iter()
        .take(MAX_SUMMARY_ENTRIES)
        .enumerate()
        .map(|(i, entry)| format!("Entry {}:\n{}", i + 1, entry.content))
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR);

    if body.len() > max_chars {
        body.truncate(floor_boundary(&body, max_chars));
        body.push_str(TRUNCATION_NOTE);
    }

    format!(
        "Aşağıda Ekşi Sözlük'teki bir başlığa ait entry'ler var. Bunları Türkçe olarak \
         özetle: ana temaları, öne çıkan görüşleri, tartışmalı noktaları ve genel duyguyu \
         belirt. Özet kısa ve anlaşılır olsun.\n\n{body}"
    )
}

/// Deterministic digest: count, average length and frequent words.
#[must_use]
pub fn statistical_summary(entries: &[Entry]) -> Summary {
    let text = if entries.is_empty() {
        "Özetlenecek entry bulunamadı.".to_string()
    } else {
        let total_chars: usize = entries.iter().map(|e| e.content.chars().count()).sum();
        let average = (total_chars as f64 / entries.len() as f64).round();
        let words = top_words(entries, TOP_WORDS);
        format!(
            "Özet (istatistiksel):\n- Toplam {} entry incelendi\n- Ortalama entry uzunluğu: {average} karakter\n- En sık geçen kelimeler: {}",
            entries.len(),
            if words.is_empty() {
                "-".to_string()
            } else {
                words.join(", ")
            }
        )
    };
    Summary {
        text,
        source: SummarySource::Statistical,
    }
}

/// Most frequent words of four or more letters, ties broken alphabetically.
#[must_use]
pub fn top_words(entries: &[Entry], count: usize) -> Vec<String> {
    let mut frequency: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        for word in WORD.find_iter(&entry.content) {
            *frequency.entry(word.as_str().to_lowercase()).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(word, _)| word).collect()
}
