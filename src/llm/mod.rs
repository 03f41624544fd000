//! Sector classification through a hosted LLM (Gemini or Groq).
//!
//! The model gets the symbol plus two candidate sector strings and answers
//! with `SECTOR:` and `SCOPE:` lines. Only the answer parsing is fixed; any
//! failure collapses into a retry marker so the row can be redone next run.

use crate::config::{LlmConfig, LlmProvider, ScraperConfig};
use crate::error::ScrapeError;
use crate::models::placeholder;
use crate::scraper::http_client::HttpClient;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const DEFAULT_SECTOR: &str = "Unknown";
pub const DEFAULT_SCOPE: &str = "No scope found";
pub const FAILED_SCOPE: &str = "Blocked or API Limit reached";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorVerdict {
    pub sector: String,
    pub scope: String,
}

impl SectorVerdict {
    pub fn retry_needed() -> Self {
        Self {
            sector: placeholder::RETRY_NEEDED.to_string(),
            scope: FAILED_SCOPE.to_string(),
        }
    }

    pub fn into_cells(self) -> Vec<String> {
        vec![self.sector, self.scope]
    }
}

pub fn build_prompt(symbol: &str, hint_b: &str, hint_c: &str) -> String {
    format!(
        "Symbol: {symbol}.\n\
         Data B: {hint_b}, C: {hint_c}.\n\
         Task: Pick the broad parent sector (IT, Finance, Metals, etc.) and write a 1-line future scope.\n\
         Format your response EXACTLY like this:\n\
         SECTOR: [Sector Name]\n\
         SCOPE: [Description]"
    )
}

/// Pull `SECTOR:`/`SCOPE:` out of a free-form answer. A label counts only
/// at the start of a line, in any case, with markdown bold or brackets around
/// it; the last occurrence wins.
pub fn parse_verdict(text: &str) -> SectorVerdict {
    let mut verdict = SectorVerdict {
        sector: DEFAULT_SECTOR.to_string(),
        scope: DEFAULT_SCOPE.to_string(),
    };

    for line in text.lines() {
        let Some((label, value)) = line.split_once(':') else { continue };
        let label = label
            .trim_matches(|c: char| c == '*' || c == '[' || c == ']' || c.is_whitespace())
            .to_uppercase();
        let value = value
            .trim()
            .trim_matches('*')
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .trim();
        if value.is_empty() {
            continue;
        }
        match label.as_str() {
            "SECTOR" => verdict.sector = value.to_string(),
            "SCOPE" => verdict.scope = value.to_string(),
            _ => {}
        }
    }
    verdict
}

/// Anything that can turn a symbol plus hints into a verdict. Failures are
/// reported as `SectorVerdict::retry_needed()`, never as errors.
#[async_trait]
pub trait SectorClassifier: Send + Sync {
    async fn classify(&self, symbol: &str, hint_b: &str, hint_c: &str) -> SectorVerdict;
}

pub struct LlmClient {
    client: HttpClient,
    provider: LlmProvider,
    model: String,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, scraper: &ScraperConfig) -> Result<Self> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.trim().is_empty()) else {
            bail!("No LLM API key (set GEMINI_API_KEY or GROQ_API_KEY)");
        };

        // pacing comes from the LLM settings, not the page-scrape delay
        let http = ScraperConfig {
            request_delay_ms: config.request_delay_ms,
            jitter_ms: 0,
            ..scraper.clone()
        };

        let (model, base_url) = match config.provider {
            LlmProvider::Gemini => ("gemini-1.5-flash", "https://generativelanguage.googleapis.com"),
            LlmProvider::Groq => ("llama-3.1-8b-instant", "https://api.groq.com/openai"),
        };

        Ok(Self {
            client: HttpClient::new(&http)?,
            provider: config.provider,
            model: config.model.clone().unwrap_or_else(|| model.to_string()),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, ScrapeError> {
        match self.provider {
            LlmProvider::Gemini => {
                // key rides in a header, never in the URL
                let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
                let resp: Value = self
                    .client
                    .post_json(&url, &[("x-goog-api-key", self.api_key.as_str())], &gemini_request(prompt))
                    .await?;
                gemini_text(&resp).ok_or_else(|| ScrapeError::NoData("empty Gemini answer".into()))
            }
            LlmProvider::Groq => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                let auth = format!("Bearer {}", self.api_key);
                let body = json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": prompt }],
                    "temperature": 0.2,
                });
                let resp: Value = self
                    .client
                    .post_json(&url, &[("Authorization", auth.as_str())], &body)
                    .await?;
                chat_text(&resp).ok_or_else(|| ScrapeError::NoData("empty Groq answer".into()))
            }
        }
    }
}

#[async_trait]
impl SectorClassifier for LlmClient {
    async fn classify(&self, symbol: &str, hint_b: &str, hint_c: &str) -> SectorVerdict {
        let prompt = build_prompt(symbol, hint_b, hint_c);
        match self.complete(&prompt).await {
            Ok(text) => {
                debug!("{}: {:?}", symbol, text);
                parse_verdict(&text)
            }
            Err(e) => {
                warn!("LLM error for {}: {}", symbol, e);
                SectorVerdict::retry_needed()
            }
        }
    }
}

/// Safety filters off: factual stock questions trip them otherwise.
fn gemini_request(prompt: &str) -> Value {
    let categories = [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ];
    json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
        "safetySettings": categories
            .iter()
            .map(|c| json!({ "category": c, "threshold": "BLOCK_NONE" }))
            .collect::<Vec<_>>(),
    })
}

fn gemini_text(resp: &Value) -> Option<String> {
    let parts = resp.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.trim().is_empty() { None } else { Some(text) }
}

fn chat_text(resp: &Value) -> Option<String> {
    resp.pointer("/choices/0/message/content")?
        .as_str()
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}
