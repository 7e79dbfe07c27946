use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::{DiscoverPage, DiscoverQuery, MovieSource, RawCredits, SourceError};
use crate::rate_limit::{AdaptiveLimiter, check_rate_limit_response};

pub const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Value shipped in the sample `.env`; treated the same as no key.
pub const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

/// Whether `key` looks like a real API key.
pub fn is_usable_api_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key != PLACEHOLDER_API_KEY
}

/// The Movie Database (TMDB) v3 API.
pub struct Tmdb {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    limiter: AdaptiveLimiter,
}

impl Tmdb {
    /// Create a client. Missing or placeholder keys leave the source
    /// unconfigured rather than failing.
    pub fn new(api_key: Option<String>, timeout: Duration, requests_per_second: u32) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.filter(|k| is_usable_api_key(k)),
            base_url: TMDB_BASE_URL.to_string(),
            client,
            timeout,
            limiter: AdaptiveLimiter::per_second(requests_per_second),
        }
    }

    /// Point at a different host (a proxy or a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// GET `url` as JSON, honoring the limiter. A 429 slows the limiter,
    /// waits out Retry-After (capped at the request timeout) and retries once.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        match self.send(url).await {
            Err(SourceError::RateLimited { retry_after }) => {
                self.limiter.on_rate_limited();
                let wait = retry_after.unwrap_or(Duration::from_secs(2)).min(self.timeout);
                tracing::info!(
                    wait_secs = wait.as_secs_f64(),
                    "TMDB rate limited, waiting then retrying"
                );
                tokio::time::sleep(wait).await;
                self.send(url).await
            }
            other => other,
        }
    }

    async fn send<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        self.limiter.acquire().await;

        let resp = self.client.get(url).timeout(self.timeout).send().await?;
        check_rate_limit_response(&resp)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Parse(e.to_string()))
    }
}

/// Build the `/discover/movie` URL for one page of theatrical, English-language
/// US releases sorted by descending popularity.
pub fn discover_url(base_url: &str, api_key: &str, query: &DiscoverQuery) -> String {
    format!(
        "{base_url}/discover/movie?api_key={}&language=en-US&region=US&sort_by=popularity.desc\
         &primary_release_date.gte={}&primary_release_date.lte={}\
         &with_release_type={}&with_original_language=en&page={}",
        urlencoding::encode(api_key),
        query.from.format("%Y-%m-%d"),
        query.to.format("%Y-%m-%d"),
        urlencoding::encode("2|3"),
        query.page,
    )
}

pub fn credits_url(base_url: &str, api_key: &str, movie_id: u64) -> String {
    format!(
        "{base_url}/movie/{movie_id}/credits?api_key={}",
        urlencoding::encode(api_key)
    )
}

impl MovieSource for Tmdb {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn discover<'a>(
        &'a self,
        query: &'a DiscoverQuery,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoverPage, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let url = discover_url(&self.base_url, self.key(), query);
            tracing::debug!(page = query.page, from = %query.from, to = %query.to, "TMDB discover");
            self.get_json(&url).await
        })
    }

    fn credits<'a>(
        &'a self,
        movie_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RawCredits, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let url = credits_url(&self.base_url, self.key(), movie_id);
            tracing::trace!(id = movie_id, "TMDB credits");
            self.get_json(&url).await
        })
    }
}
