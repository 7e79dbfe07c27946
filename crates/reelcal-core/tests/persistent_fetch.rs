//! End-to-end tests for [`ReleaseFetcher`] over a SQLite-backed cache.
//!
//! A tiny in-file source stands in for TMDB so no HTTP requests are made.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use reelcal_core::source::{DiscoverPage, DiscoverQuery, RawCredits, RawMovie};
use reelcal_core::{
    FetcherOptions, MovieSource, QueryCache, ReleaseFetcher, SourceError, YearMonth, build_cache,
    group_by_date,
};

/// One page of three March releases; credits name a single director.
#[derive(Default)]
struct OnePage {
    discover_calls: AtomicUsize,
}

impl MovieSource for OnePage {
    fn is_configured(&self) -> bool {
        true
    }

    fn discover<'a>(
        &'a self,
        _query: &'a DiscoverQuery,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoverPage, SourceError>> + Send + 'a>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let json = r#"{
                "total_pages": 1,
                "results": [
                    {"id": 2, "title": "Big", "release_date": "2026-03-01", "popularity": 99.0, "genre_ids": [878]},
                    {"id": 3, "title": "Mid", "release_date": "2026-03-15", "popularity": 50.0},
                    {"id": 1, "title": "Small", "release_date": "2026-03-01", "popularity": 20.0}
                ]
            }"#;
            serde_json::from_str(json).map_err(|e| SourceError::Parse(e.to_string()))
        })
    }

    fn credits<'a>(
        &'a self,
        movie_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RawCredits, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let json = format!(
                r#"{{"cast": [{{"name": "Lead {movie_id}"}}], "crew": [{{"name": "Dir {movie_id}", "job": "Director"}}]}}"#
            );
            serde_json::from_str(&json).map_err(|e| SourceError::Parse(e.to_string()))
        })
    }
}

fn fetcher(source: Arc<OnePage>, cache: QueryCache) -> ReleaseFetcher {
    ReleaseFetcher::with_clock(source, Arc::new(cache), FetcherOptions::default(), || {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    })
}

fn march() -> YearMonth {
    YearMonth::new(2026, 3).unwrap()
}

#[tokio::test]
async fn month_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let first_source = Arc::new(OnePage::default());
    let first = fetcher(first_source.clone(), build_cache(Some(&path)));
    assert!(first.cache().has_persistence());
    let fetched = first.fetch_month(march()).await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched[0].director, "Dir 2");
    assert_eq!(fetched[0].genres, vec!["Science Fiction"]);
    drop(first);

    let second_source = Arc::new(OnePage::default());
    let second = fetcher(second_source.clone(), build_cache(Some(&path)));
    let reloaded = second.fetch_month(march()).await.unwrap();

    assert_eq!(*reloaded, *fetched);
    assert_eq!(first_source.discover_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_source.discover_calls.load(Ordering::SeqCst), 0);
    // Month list plus one credits row per release.
    assert_eq!(second.cache().disk_len().unwrap(), 4);
}

#[tokio::test]
async fn fetched_month_groups_by_date() {
    let f = fetcher(Arc::new(OnePage::default()), QueryCache::in_memory());
    let list = f.fetch_month(march()).await.unwrap();
    let grouped = group_by_date(&list);

    let first_day: Vec<u64> = grouped["2026-03-01"].iter().map(|r| r.id).collect();
    assert_eq!(first_day, vec![2, 1]);
    assert_eq!(grouped["2026-03-15"][0].id, 3);
}

#[tokio::test]
async fn clear_forces_refetch() {
    let source = Arc::new(OnePage::default());
    let dir = tempfile::tempdir().unwrap();
    let f = fetcher(source.clone(), build_cache(Some(&dir.path().join("cache.sqlite"))));

    f.fetch_month(march()).await.unwrap();
    f.cache().clear().unwrap();
    assert_eq!(f.cache().disk_len().unwrap(), 0);
    f.fetch_month(march()).await.unwrap();

    assert_eq!(source.discover_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn raw_movie_without_popularity_is_zero() {
    let raw: RawMovie = serde_json::from_str(r#"{"id": 9}"#).unwrap();
    assert_eq!(raw.into_release().popularity, 0.0);
}
