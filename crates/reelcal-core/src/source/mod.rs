//! Upstream movie-database backend trait and response types.

#[cfg(test)]
pub mod mock;
pub mod tmdb;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::Release;
use crate::genres::genre_names;

/// Failure talking to the upstream API. Always absorbed by the fetch layer.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed response: {0}")]
    Parse(String),
}

/// One page request against the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub page: u32,
}

/// A single page of discovery results, in upstream order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoverPage {
    pub results: Vec<RawMovie>,
    #[serde(default)]
    pub total_pages: Option<u32>,
}

/// A movie as the discovery endpoint reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMovie {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub release_date: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub overview: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vote_average: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub popularity: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre_ids: Vec<u32>,
}

impl RawMovie {
    /// Convert to a [`Release`] with empty credits. Scores are clamped to be
    /// non-negative and finite.
    pub fn into_release(self) -> Release {
        Release {
            id: self.id,
            title: self.title,
            release_date: self.release_date,
            poster_path: self.poster_path.filter(|p| !p.is_empty()),
            overview: self.overview,
            vote_average: non_negative(self.vote_average),
            popularity: non_negative(self.popularity),
            cast: Vec::new(),
            director: String::new(),
            genres: genre_names(&self.genre_ids),
        }
    }
}

fn non_negative(score: f64) -> f64 {
    if score.is_finite() { score.max(0.0) } else { 0.0 }
}

/// Credits as the per-movie credits endpoint reports them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCredits {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cast: Vec<CastMember>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub crew: Vec<CrewMember>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CastMember {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrewMember {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub job: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An upstream that can list a month's releases and look up credits.
pub trait MovieSource: Send + Sync {
    /// Whether the source has usable credentials. An unconfigured source is
    /// never queried.
    fn is_configured(&self) -> bool;

    /// Fetch one page of releases in the query's date range, sorted by
    /// descending popularity.
    fn discover<'a>(
        &'a self,
        query: &'a DiscoverQuery,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoverPage, SourceError>> + Send + 'a>>;

    /// Fetch cast and crew for one movie.
    fn credits<'a>(
        &'a self,
        movie_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RawCredits, SourceError>> + Send + 'a>>;
}
