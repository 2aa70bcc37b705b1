use crate::backoff::BackoffController;
use crate::throttle::{DomainThrottle, ServiceClass};
use async_trait::async_trait;
use common::{BackoffConfig, FeedSource, FetchConfig};
use anyhow::{Context, Result};
use feed_rs::model::Feed;
use feed_rs::parser;
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Per-attempt failure taxonomy. Network errors are retryable, rate limits
/// escalate backoff, parse errors fail the source for the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed feed payload: {0}")]
    Parse(String),
}

/// Result of one `fetch_one` call, after retries.
#[derive(Debug)]
pub enum FetchOutcome {
    Success { feed: Feed },
    RateLimited { retry_after: Option<Duration> },
    TransientError { cause: FetchError },
    PermanentSkip { reason: String },
}

/// Transport-layer capability: fetch a URL to raw bytes. Direct HTTP and
/// proxied transports are interchangeable behind this trait; retry and
/// backoff logic never sees the difference.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Common browser User-Agent strings, rotated per request so repeated polls
/// do not present a single client signature.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
];

fn pick_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Direct-fetch transport over reqwest with a bounded timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, pick_user_agent())
            .header(
                ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(FetchError::Network(format!("http status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Wraps one feed fetch+parse with bounded retries, consulting the skip
/// list, the domain throttle and the backoff controller in that order.
pub struct FetchRetrier {
    transport: Arc<dyn Transport>,
    max_attempts: u32,
    jitter: Duration,
}

impl FetchRetrier {
    pub fn new(transport: Arc<dyn Transport>, backoff: &BackoffConfig, fetch: &FetchConfig) -> Self {
        Self {
            transport,
            max_attempts: backoff.max_attempts(),
            jitter: fetch.jitter(),
        }
    }

    /// Fetches and parses one source.
    ///
    /// Every attempt records its contact time in the throttle, success or
    /// failure, so spacing stays accurate on failure paths. Exhausting the
    /// budget on rate limits places the host on the skip list; later calls
    /// within the cooldown return `PermanentSkip` without any network call.
    pub async fn fetch_one(
        &self,
        source: &FeedSource,
        class: ServiceClass,
        throttle: &mut DomainThrottle,
        backoff: &mut BackoffController,
    ) -> FetchOutcome {
        let host = match source.host() {
            Some(h) => h,
            None => {
                return FetchOutcome::PermanentSkip {
                    reason: format!("invalid endpoint URL: {}", source.url),
                }
            }
        };

        if let Some(rest) = backoff.skip_remaining(&host, Instant::now()) {
            debug!(source = %source.slug, host = %host, "host on cooldown, skipping");
            return FetchOutcome::PermanentSkip {
                reason: format!("on cooldown for {}s after rate limiting", rest.as_secs()),
            };
        }

        for attempt in 1..=self.max_attempts {
            let clearance = throttle.clearance_delay(&host, class, Instant::now());
            let pause = clearance + self.jitter_amount();
            if pause > Duration::ZERO {
                debug!(host = %host, wait_ms = pause.as_millis() as u64, "waiting for clearance");
                tokio::time::sleep(pause).await;
            }
            throttle.record_contact(&host, class, Instant::now());

            match self.transport.fetch(&source.url).await {
                Ok(bytes) => match parser::parse(bytes.as_slice()) {
                    Ok(feed) => {
                        backoff.record_success(&host);
                        info!(source = %source.slug, items = feed.entries.len(), "fetched feed");
                        return FetchOutcome::Success { feed };
                    }
                    Err(e) => {
                        warn!(source = %source.slug, error = %e, "feed payload failed to parse");
                        return FetchOutcome::TransientError {
                            cause: FetchError::Parse(e.to_string()),
                        };
                    }
                },
                Err(FetchError::RateLimited { retry_after }) => {
                    warn!(source = %source.slug, host = %host, attempt, "explicit rate limit signal");
                    backoff.record_rate_limit(&host);
                    if attempt == self.max_attempts {
                        backoff.place_on_skip_list(&host, Instant::now());
                        return FetchOutcome::RateLimited { retry_after };
                    }
                    let mut delay = backoff.failure_delay(&host, attempt);
                    if let Some(hint) = retry_after {
                        delay = delay.max(hint.min(backoff.cap()));
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(FetchError::Network(cause)) => {
                    if attempt == self.max_attempts {
                        return FetchOutcome::TransientError {
                            cause: FetchError::Network(cause),
                        };
                    }
                    let delay = backoff.failure_delay(&host, attempt);
                    debug!(source = %source.slug, attempt, error = %cause, delay_ms = delay.as_millis() as u64, "retrying after network error");
                    tokio::time::sleep(delay).await;
                }
                Err(other) => {
                    return FetchOutcome::TransientError { cause: other };
                }
            }
        }

        FetchOutcome::TransientError {
            cause: FetchError::Network("retry budget exhausted".to_string()),
        }
    }

    fn jitter_amount(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}
