//! Month release listing: cache, coalesce, page, enrich, store.
//!
//! [`ReleaseFetcher::fetch_month`] answers from the cache when it can. On a
//! miss it joins (or starts) the single in-flight load for that month. The
//! load runs as a detached task: pages of the discovery endpoint are walked in
//! order, releases below the month's popularity threshold are dropped, the
//! most popular prefix is enriched with credits, and the list is cached.
//!
//! Paging stops early when a page's last result is below the threshold. This
//! relies on the upstream returning results sorted by descending popularity,
//! which the discovery query requests; unsorted pages would be undercounted.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::Release;
use crate::cache::{CacheError, QueryCache};
use crate::coalesce::{CoalesceError, Coalescer};
use crate::credits::CreditEnricher;
use crate::month::YearMonth;
use crate::popularity::min_popularity;
use crate::source::{DiscoverQuery, MovieSource, RawMovie};

/// Discovery pages requested per month at most (20 results per page).
pub const MAX_PAGES: u32 = 5;
/// Releases, by fetch order, that get credits looked up.
pub const CREDITS_LIMIT: usize = 15;
/// Cast names kept per release.
pub const CAST_LIMIT: usize = 3;
/// Concurrent credit lookups.
pub const CREDIT_WORKERS: usize = 8;
pub const MONTH_TTL: Duration = Duration::from_secs(60 * 60);
pub const CREDITS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Fetch tunables. [`Default`] gives the production values.
#[derive(Debug, Clone, PartialEq)]
pub struct FetcherOptions {
    pub max_pages: u32,
    pub credits_limit: usize,
    pub cast_limit: usize,
    pub credit_workers: usize,
    pub month_ttl: Duration,
    pub credits_ttl: Duration,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            max_pages: MAX_PAGES,
            credits_limit: CREDITS_LIMIT,
            cast_limit: CAST_LIMIT,
            credit_workers: CREDIT_WORKERS,
            month_ttl: MONTH_TTL,
            credits_ttl: CREDITS_TTL,
        }
    }
}

/// Hard failure of a month fetch. Upstream trouble never shows up here; it
/// degrades to partial or empty results instead.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("cache storage failure: {0}")]
    Cache(Arc<CacheError>),
    #[error(transparent)]
    Aborted(#[from] CoalesceError),
}

impl From<CacheError> for FetchError {
    fn from(e: CacheError) -> Self {
        Self::Cache(Arc::new(e))
    }
}

impl FetchError {
    /// Whether the cache backing store failed (as opposed to the load task
    /// dying).
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Cache(_))
    }
}

pub type MonthReleases = Arc<Vec<Release>>;

type MonthResult = Result<MonthReleases, FetchError>;

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Cheap to clone; clones share the cache, the coalescer and the source.
#[derive(Clone)]
pub struct ReleaseFetcher {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn MovieSource>,
    cache: Arc<QueryCache>,
    enricher: CreditEnricher,
    coalescer: Coalescer<MonthResult>,
    options: FetcherOptions,
    today: Clock,
}

impl ReleaseFetcher {
    pub fn new(
        source: Arc<dyn MovieSource>,
        cache: Arc<QueryCache>,
        options: FetcherOptions,
    ) -> Self {
        Self::with_clock(source, cache, options, || {
            chrono::Local::now().date_naive()
        })
    }

    /// Like [`new`](Self::new) with a custom notion of "today", which drives
    /// the popularity threshold.
    pub fn with_clock(
        source: Arc<dyn MovieSource>,
        cache: Arc<QueryCache>,
        options: FetcherOptions,
        today: impl Fn() -> NaiveDate + Send + Sync + 'static,
    ) -> Self {
        let enricher = CreditEnricher::new(
            Arc::clone(&source),
            Arc::clone(&cache),
            options.credit_workers,
            options.cast_limit,
            options.credits_ttl,
        );
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                enricher,
                coalescer: Coalescer::new(),
                options,
                today: Arc::new(today),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.inner.cache
    }

    pub fn options(&self) -> &FetcherOptions {
        &self.inner.options
    }

    /// Whether the upstream has credentials. Without them every fetch
    /// yields an empty list.
    pub fn is_configured(&self) -> bool {
        self.inner.source.is_configured()
    }

    /// Months currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.inner.coalescer.in_flight()
    }

    /// Releases for `month`, most popular first within each page.
    ///
    /// Concurrent calls for the same month share one load and receive the
    /// same `Arc`. Dropping the returned future does not cancel the load or
    /// its cache write. Only cache storage failures are errors.
    pub async fn fetch_month(&self, month: YearMonth) -> Result<MonthReleases, FetchError> {
        let key = month.cache_key();
        if let Some(hit) = self.inner.cache.get::<Vec<Release>>(&key)? {
            return Ok(Arc::new(hit));
        }

        let inner = Arc::clone(&self.inner);
        let (shared, joined) = self
            .inner
            .coalescer
            .run(&key, move || async move { inner.load_month(month).await });
        if joined {
            tracing::debug!(%month, "joining in-flight fetch");
        }
        shared.await?
    }
}

impl Inner {
    async fn load_month(&self, month: YearMonth) -> MonthResult {
        let key = month.cache_key();
        // A load that settled between the caller's miss and this task
        // registering has already filled the cache.
        if let Some(hit) = self.cache.get::<Vec<Release>>(&key)? {
            return Ok(Arc::new(hit));
        }

        if !self.source.is_configured() {
            tracing::warn!(%month, "TMDB API key not configured, returning no releases");
            return Ok(Arc::new(Vec::new()));
        }

        let min_pop = min_popularity(month, (self.today)());
        let mut releases = self.collect_pages(month, min_pop).await;

        let limit = self.options.credits_limit.min(releases.len());
        self.enricher.enrich(&mut releases[..limit]).await;

        self.cache.set(&key, &releases, self.options.month_ttl)?;
        tracing::info!(
            %month,
            count = releases.len(),
            enriched = limit,
            min_popularity = min_pop,
            "fetched month"
        );
        Ok(Arc::new(releases))
    }

    /// Walk discovery pages in order, keeping releases at or above `min_pop`.
    /// A failing page ends the walk; what was gathered so far is kept.
    async fn collect_pages(&self, month: YearMonth, min_pop: f64) -> Vec<Release> {
        let mut releases = Vec::new();

        for page in 1..=self.options.max_pages {
            let query = DiscoverQuery {
                from: month.first_day(),
                to: month.last_day(),
                page,
            };
            let batch = match self.source.discover(&query).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(%month, page, error = %e, "discovery page failed, keeping partial results");
                    break;
                }
            };

            let tail_below = batch
                .results
                .last()
                .is_some_and(|m| m.popularity < min_pop);
            let before = releases.len();
            releases.extend(
                batch
                    .results
                    .into_iter()
                    .filter(|m| m.popularity >= min_pop)
                    .map(RawMovie::into_release),
            );
            tracing::debug!(%month, page, kept = releases.len() - before, "discovery page");

            if batch.total_pages.is_some_and(|total| page >= total) {
                break;
            }
            if tail_below {
                tracing::debug!(%month, page, min_popularity = min_pop, "page tail below threshold, stopping");
                break;
            }
        }

        releases
    }
}
