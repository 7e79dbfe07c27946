use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod coalesce;
pub mod config_file;
pub mod credits;
pub mod fetcher;
pub mod genres;
pub mod grouping;
pub mod month;
pub mod popularity;
pub mod poster;
pub mod prefetch;
pub mod rate_limit;
pub mod source;

// Re-export for convenience
pub use cache::{CacheError, QueryCache, build_cache};
pub use coalesce::{CoalesceError, Coalescer};
pub use credits::{CreditEnricher, Credits};
pub use fetcher::{FetchError, FetcherOptions, MonthReleases, ReleaseFetcher};
pub use grouping::group_by_date;
pub use month::YearMonth;
pub use popularity::min_popularity;
pub use poster::poster_url;
pub use source::tmdb::{Tmdb, is_usable_api_key};
pub use source::{MovieSource, SourceError};

/// A theatrical release as served to callers and stored in the cache.
///
/// Built from a discovery result with empty credits; the most popular
/// releases of a month get `cast` and `director` filled in before the list
/// is cached. Never changed after that.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub title: String,
    /// `YYYY-MM-DD`; the grouping key.
    pub release_date: String,
    pub poster_path: Option<String>,
    pub overview: String,
    pub vote_average: f64,
    pub popularity: f64,
    /// Up to three billed cast members.
    pub cast: Vec<String>,
    pub director: String,
    pub genres: Vec<String>,
}

/// Default upstream request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default upstream request rate.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 20;
pub const DEFAULT_PORT: u16 = 3000;

/// Resolved runtime configuration shared by the binaries.
#[derive(Clone)]
pub struct Config {
    pub tmdb_api_key: Option<String>,
    /// SQLite cache file. `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,
    pub timeout: Duration,
    pub requests_per_second: u32,
    pub port: u16,
    pub fetch: FetcherOptions,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("tmdb_api_key", &self.tmdb_api_key.as_ref().map(|_| "***"))
            .field("cache_path", &self.cache_path)
            .field("timeout", &self.timeout)
            .field("requests_per_second", &self.requests_per_second)
            .field("port", &self.port)
            .field("fetch", &self.fetch)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            cache_path: None,
            timeout: DEFAULT_TIMEOUT,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            port: DEFAULT_PORT,
            fetch: FetcherOptions::default(),
        }
    }
}

impl Config {
    /// Whether a usable (non-placeholder) API key is set.
    pub fn has_api_key(&self) -> bool {
        self.tmdb_api_key.as_deref().is_some_and(is_usable_api_key)
    }
}

/// Build a [`ReleaseFetcher`] from configuration: TMDB source, cache at
/// `cache_path` (in memory if unset or unopenable), configured tunables.
pub fn build_fetcher(config: &Config) -> ReleaseFetcher {
    let source = Tmdb::new(
        config.tmdb_api_key.clone(),
        config.timeout,
        config.requests_per_second,
    );
    let cache = build_cache(config.cache_path.as_deref());
    ReleaseFetcher::new(Arc::new(source), Arc::new(cache), config.fetch.clone())
}
