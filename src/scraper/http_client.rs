use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::cookie::Jar;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

pub type Headers<'a> = &'a [(&'static str, &'a str)];

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let builder = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true);

        // Accept cookies so session-based pages work
        let builder = match config.cookies.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(raw) => {
                let jar = load_cookie_jar(raw).context("Failed to load cookies")?;
                builder.cookie_provider(Arc::new(jar))
            }
            None => builder.cookie_store(true),
        };

        let inner = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text with rate-limiting and retry.
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        self.get_text_with(url, &[]).await
    }

    pub async fn get_text_with(&self, url: &str, headers: Headers<'_>) -> Result<String, ScrapeError> {
        self.execute(url, |client| with_headers(client.get(url), headers))
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: Headers<'_>,
    ) -> Result<T, ScrapeError> {
        let body = self.get_text_with(url, headers).await?;
        decode(&body)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        headers: Headers<'_>,
        payload: &B,
    ) -> Result<T, ScrapeError> {
        let body = self
            .execute(url, |client| with_headers(client.post(url), headers).json(payload))
            .await?;
        decode(&body)
    }

    /// Polite delay, then the request with exponential backoff on transient
    /// failures. Other 4xx responses fail on the first attempt.
    async fn execute<F>(&self, url: &str, build: F) -> Result<String, ScrapeError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.polite_delay().await;

        let mut attempt = 0u32;
        let action = || {
            attempt += 1;
            debug!("{} (attempt {})", url, attempt);
            let request = build(&self.inner);
            async move { read_body(url, request).await }
        };

        let retry_if = |e: &ScrapeError| {
            let transient = e.is_transient();
            if transient {
                warn!("Transient failure for {}: {}", url, e);
            }
            transient
        };

        RetryIf::start(self.backoff(), action, retry_if).await
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        let base = (self.config.request_delay_ms / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(base)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(self.config.max_retries as usize)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter_ms);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}

fn with_headers(mut request: reqwest::RequestBuilder, headers: Headers<'_>) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    request
}

async fn read_body(url: &str, request: reqwest::RequestBuilder) -> Result<String, ScrapeError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ScrapeError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(resp.text().await?)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ScrapeError> {
    serde_json::from_str(body).map_err(|e| ScrapeError::Parse(e.to_string()))
}

// ── Cookies ───────────────────────────────────────────────────────────────────

/// One entry of a browser cookie export.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl BrowserCookie {
    fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(".tradingview.com")
    }

    fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }

    /// `Set-Cookie` style header plus the URL it belongs to.
    pub fn to_set_cookie(&self) -> Result<(String, Url)> {
        let header = format!(
            "{}={}; Domain={}; Path={}",
            self.name,
            self.value,
            self.domain(),
            self.path()
        );
        let host = self.domain().trim_start_matches('.');
        let url = Url::parse(&format!("https://{}{}", host, self.path()))
            .with_context(|| format!("Bad cookie domain {:?}", self.domain()))?;
        Ok((header, url))
    }
}

/// Inline JSON array, or a path to a file holding one.
pub fn parse_cookies(raw: &str) -> Result<Vec<BrowserCookie>> {
    let raw = raw.trim();
    let json = if raw.starts_with('[') {
        raw.to_string()
    } else {
        std::fs::read_to_string(raw).with_context(|| format!("Failed to read cookie file {}", raw))?
    };
    serde_json::from_str(&json).context("Cookie JSON must be an array of {name, value, domain, path}")
}

fn load_cookie_jar(raw: &str) -> Result<Jar> {
    let jar = Jar::default();
    let cookies = parse_cookies(raw)?;
    for cookie in &cookies {
        let (header, url) = cookie.to_set_cookie()?;
        jar.add_cookie_str(&header, &url);
    }
    debug!("Loaded {} cookies", cookies.len());
    Ok(jar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_cookie_json_becomes_set_cookie_headers() {
        let cookies = parse_cookies(
            r#"[{"name":"sessionid","value":"abc","domain":".tradingview.com","path":"/"},
                {"name":"device_t","value":"xyz"}]"#,
        )
        .unwrap();
        assert_eq!(cookies.len(), 2);

        let (header, url) = cookies[0].to_set_cookie().unwrap();
        assert_eq!(header, "sessionid=abc; Domain=.tradingview.com; Path=/");
        assert_eq!(url.as_str(), "https://tradingview.com/");

        let (header, _) = cookies[1].to_set_cookie().unwrap();
        assert!(header.starts_with("device_t=xyz;"));
    }

    #[test]
    fn cookie_file_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, r#"[{"name":"a","value":"1"}]"#).unwrap();
        let cookies = parse_cookies(path.to_str().unwrap()).unwrap();
        assert_eq!(cookies[0].name, "a");
        assert!(parse_cookies("/definitely/not/here.json").is_err());
    }

    #[test]
    fn client_builds_with_and_without_cookies() {
        let mut config = ScraperConfig::default();
        assert!(HttpClient::new(&config).is_ok());
        config.cookies = Some(r#"[{"name":"a","value":"1"}]"#.into());
        assert!(HttpClient::new(&config).is_ok());
        config.cookies = Some("[not json".into());
        assert!(HttpClient::new(&config).is_err());
    }

    #[test]
    fn backoff_is_bounded_by_retry_count() {
        let config = ScraperConfig {
            max_retries: 2,
            ..ScraperConfig::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(client.backoff().count(), 2);
    }
}
