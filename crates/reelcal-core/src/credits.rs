//! Cast/director enrichment for the top releases of a month.
//!
//! A fixed number of workers pull indices from a shared queue until it is
//! drained; `enrich` returns only after every worker has finished. Lookups are
//! best-effort: a failed credits call leaves the release with empty credits.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::Release;
use crate::cache::QueryCache;
use crate::source::{MovieSource, RawCredits};

/// Job title that identifies the director in a crew list.
const DIRECTOR_JOB: &str = "Director";

/// Cast and director for one movie, as cached under `credits:{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credits {
    pub cast: Vec<String>,
    pub director: String,
}

impl Credits {
    /// First `cast_limit` billed cast members and the first crew member whose
    /// job is exactly "Director". Billing slots are kept as listed, so a
    /// member without a name stays in the cast as an empty string.
    pub fn from_raw(raw: RawCredits, cast_limit: usize) -> Self {
        let cast = raw
            .cast
            .into_iter()
            .take(cast_limit)
            .map(|c| c.name)
            .collect();
        let director = raw
            .crew
            .into_iter()
            .find(|c| c.job == DIRECTOR_JOB)
            .map(|c| c.name)
            .unwrap_or_default();
        Self { cast, director }
    }
}

pub fn credits_cache_key(movie_id: u64) -> String {
    format!("credits:{movie_id}")
}

pub struct CreditEnricher {
    source: Arc<dyn MovieSource>,
    cache: Arc<QueryCache>,
    workers: usize,
    cast_limit: usize,
    ttl: Duration,
}

impl CreditEnricher {
    pub fn new(
        source: Arc<dyn MovieSource>,
        cache: Arc<QueryCache>,
        workers: usize,
        cast_limit: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            workers,
            cast_limit,
            ttl,
        }
    }

    /// Fill `cast` and `director` on every release in the slice, in place.
    /// Order is untouched.
    pub async fn enrich(&self, releases: &mut [Release]) {
        if releases.is_empty() {
            return;
        }

        let (tx, rx) = async_channel::unbounded::<(usize, u64)>();
        for (index, release) in releases.iter().enumerate() {
            let _ = tx.try_send((index, release.id));
        }
        // Closed queue: workers drain what is left, then exit.
        tx.close();

        let workers = self.workers.clamp(1, releases.len());
        tracing::debug!(count = releases.len(), workers, "enriching credits");

        let batches = join_all((0..workers).map(|_| self.worker(rx.clone()))).await;
        for (index, credits) in batches.into_iter().flatten() {
            let release = &mut releases[index];
            release.cast = credits.cast;
            release.director = credits.director;
        }
    }

    async fn worker(&self, rx: async_channel::Receiver<(usize, u64)>) -> Vec<(usize, Credits)> {
        let mut done = Vec::new();
        while let Ok((index, movie_id)) = rx.recv().await {
            done.push((index, self.lookup(movie_id).await));
        }
        done
    }

    /// Credits for one movie: cache first, then upstream. Never fails.
    pub async fn lookup(&self, movie_id: u64) -> Credits {
        let key = credits_cache_key(movie_id);
        match self.cache.get::<Credits>(&key) {
            Ok(Some(hit)) => return hit,
            Ok(None) => {}
            Err(e) => tracing::warn!(key, error = %e, "credits cache read failed"),
        }

        match self.source.credits(movie_id).await {
            Ok(raw) => {
                let credits = Credits::from_raw(raw, self.cast_limit);
                if let Err(e) = self.cache.set(&key, &credits, self.ttl) {
                    tracing::warn!(key, error = %e, "credits cache write failed");
                }
                credits
            }
            Err(e) => {
                tracing::debug!(id = movie_id, error = %e, "credits lookup failed");
                Credits::default()
            }
        }
    }
}
