//! Reddit read-API client: cutoff-bounded listing pagination and comment
//! tree walking, with retry/backoff and rate-limit honoring.

mod parse;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use threadmine_core::{ForumComment, ForumSource, PostPage};

pub use parse::{comments_from_tree, page_from_listing, Listing};

pub const CRATE_NAME: &str = "threadmine-reddit";

const OAUTH_BASE: &str = "https://oauth.reddit.com";
const PUBLIC_BASE: &str = "https://www.reddit.com";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reddit auth failed: {0}")]
    Auth(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub user_agent: String,
    /// Optional script-app credentials; absent means anonymous access
    /// against the public JSON endpoints.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: Duration,
    /// Self-imposed floor between requests, honored before any 429 is seen.
    pub min_request_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: "web:threadmine:v0.1 (by /u/threadmine)".to_string(),
            client_id: None,
            client_secret: None,
            timeout: Duration::from_secs(20),
            min_request_interval: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RedditConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: std::env::var("REDDIT_USER_AGENT").unwrap_or(defaults.user_agent),
            client_id: std::env::var("REDDIT_CLIENT_ID").ok().filter(|v| !v.is_empty()),
            client_secret: std::env::var("REDDIT_CLIENT_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            ..defaults
        }
    }
}

#[derive(Debug, Clone)]
struct BearerToken {
    token: String,
    expires_at: Instant,
}

/// Session-scoped client; construct one per run and thread it through so no
/// auth or throttle state leaks across runs.
pub struct RedditClient {
    config: RedditConfig,
    http: reqwest::Client,
    token: Mutex<Option<BearerToken>>,
    last_request: Mutex<Option<Instant>>,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
            last_request: Mutex::new(None),
        })
    }

    fn authenticated(&self) -> bool {
        self.config.client_id.is_some() && self.config.client_secret.is_some()
    }

    fn listing_url(&self, community: &str, limit: u32, after: Option<&str>) -> String {
        let mut url = if self.authenticated() {
            format!("{OAUTH_BASE}/r/{community}/new?limit={limit}&raw_json=1")
        } else {
            format!("{PUBLIC_BASE}/r/{community}/new.json?limit={limit}&raw_json=1")
        };
        if let Some(after) = after {
            url.push_str("&after=");
            url.push_str(after);
        }
        url
    }

    fn comments_url(&self, community: &str, post_external_id: &str, max_depth: u32) -> String {
        if self.authenticated() {
            format!(
                "{OAUTH_BASE}/r/{community}/comments/{post_external_id}?limit=100&depth={max_depth}&raw_json=1"
            )
        } else {
            format!(
                "{PUBLIC_BASE}/r/{community}/comments/{post_external_id}.json?limit=100&depth={max_depth}&raw_json=1"
            )
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_request_interval {
                tokio::time::sleep(self.config.min_request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn ensure_token(&self) -> Result<Option<String>, FetchError> {
        let (Some(client_id), Some(client_secret)) =
            (&self.config.client_id, &self.config.client_secret)
        else {
            return Ok(None);
        };

        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(Some(token.token.clone()));
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        // Refresh one minute before the provider's expiry.
        let expires_at =
            Instant::now() + Duration::from_secs(body.expires_in.saturating_sub(60).max(1));
        let token = BearerToken {
            token: body.access_token,
            expires_at,
        };
        let value = token.token.clone();
        *guard = Some(token);
        Ok(Some(value))
    }

    /// One logical fetch. Retries on 429 (provider-specified delay) and on
    /// transient failures (exponential backoff); the caller accounts for the
    /// whole call as a single operation regardless of internal retries.
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let bearer = self.ensure_token().await?;

        for attempt in 0..=self.config.backoff.max_retries {
            self.throttle().await;

            let mut request = self.http.get(url);
            if let Some(token) = &bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let wait = retry_after_seconds(&response);
                        warn!(url, wait_secs = wait, "rate limited, honoring retry-after");
                        if attempt < self.config.backoff.max_retries {
                            tokio::time::sleep(Duration::from_secs(wait)).await;
                            continue;
                        }
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }

                    if status.is_server_error() && attempt < self.config.backoff.max_retries {
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }

                    return Ok(response.json().await?);
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if retryable && attempt < self.config.backoff.max_retries {
                        warn!(url, attempt, error = %err, "transient fetch failure, backing off");
                        tokio::time::sleep(self.config.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        unreachable!("retry loop always returns")
    }
}

fn retry_after_seconds(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait]
impl ForumSource for RedditClient {
    async fn fetch_posts(
        &self,
        community: &str,
        cutoff_epoch: i64,
        after: Option<&str>,
        page_limit: u32,
    ) -> Result<PostPage> {
        let url = self.listing_url(community, page_limit, after);
        debug!(community, cutoff_epoch, ?after, "fetching listing page");
        let body = self.get_json(&url).await?;
        let listing: Listing = serde_json::from_value(body)?;
        Ok(page_from_listing(listing, cutoff_epoch))
    }

    async fn fetch_comments(
        &self,
        community: &str,
        post_external_id: &str,
        max_depth: u32,
        max_count: usize,
    ) -> Result<Vec<ForumComment>> {
        let url = self.comments_url(community, post_external_id, max_depth);
        debug!(community, post_external_id, "fetching comment tree");
        let body = self.get_json(&url).await?;
        Ok(comments_from_tree(&body, post_external_id, max_depth, max_count))
    }
}
