//! Scripted upstream for tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    CastMember, CrewMember, DiscoverPage, DiscoverQuery, MovieSource, RawCredits, RawMovie,
    SourceError,
};

/// Build a discovery result with the given id, date and popularity.
pub fn raw_movie(id: u64, release_date: &str, popularity: f64) -> RawMovie {
    RawMovie {
        id,
        title: format!("Movie {id}"),
        release_date: release_date.to_string(),
        poster_path: Some(format!("/poster{id}.jpg")),
        overview: format!("Overview of movie {id}"),
        vote_average: 7.0,
        popularity,
        genre_ids: vec![18],
    }
}

/// Four cast members and a two-person crew; the director is listed second.
pub fn default_credits(movie_id: u64) -> RawCredits {
    RawCredits {
        cast: (1..=4)
            .map(|n| CastMember {
                name: format!("Actor {movie_id}-{n}"),
            })
            .collect(),
        crew: vec![
            CrewMember {
                name: format!("Writer {movie_id}"),
                job: "Screenplay".into(),
            },
            CrewMember {
                name: format!("Director {movie_id}"),
                job: "Director".into(),
            },
        ],
    }
}

/// A hand-rolled [`MovieSource`] for tests.
///
/// Pages not scripted come back empty with `total_pages` equal to the page
/// number. Credits not scripted come from [`default_credits`]. Every call is
/// recorded.
pub struct MockSource {
    configured: bool,
    pages: HashMap<u32, Result<DiscoverPage, String>>,
    credits: HashMap<u64, Result<RawCredits, String>>,
    delay: Option<Duration>,
    discover_calls: Mutex<Vec<u32>>,
    credit_calls: Mutex<Vec<u64>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            configured: true,
            pages: HashMap::new(),
            credits: HashMap::new(),
            delay: None,
            discover_calls: Mutex::new(Vec::new()),
            credit_calls: Mutex::new(Vec::new()),
        }
    }

    /// A source with no API key.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn with_page(mut self, page: u32, results: Vec<RawMovie>, total_pages: u32) -> Self {
        self.pages.insert(
            page,
            Ok(DiscoverPage {
                results,
                total_pages: Some(total_pages),
            }),
        );
        self
    }

    pub fn with_failing_page(mut self, page: u32, message: &str) -> Self {
        self.pages.insert(page, Err(message.to_string()));
        self
    }

    pub fn with_failing_credits(mut self, movie_id: u64) -> Self {
        self.credits
            .insert(movie_id, Err("connection reset".to_string()));
        self
    }

    pub fn with_credits(mut self, movie_id: u64, credits: RawCredits) -> Self {
        self.credits.insert(movie_id, Ok(credits));
        self
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Page numbers requested, in call order.
    pub fn discover_calls(&self) -> Vec<u32> {
        self.discover_calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Movie ids whose credits were requested, in call order.
    pub fn credit_calls(&self) -> Vec<u64> {
        self.credit_calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MovieSource for MockSource {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn discover<'a>(
        &'a self,
        query: &'a DiscoverQuery,
    ) -> Pin<Box<dyn Future<Output = Result<DiscoverPage, SourceError>> + Send + 'a>> {
        self.discover_calls.lock().unwrap_or_else(|e| e.into_inner()).push(query.page);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match self.pages.get(&query.page) {
                Some(Ok(page)) => Ok(page.clone()),
                Some(Err(msg)) => Err(SourceError::Parse(msg.clone())),
                None => Ok(DiscoverPage {
                    results: Vec::new(),
                    total_pages: Some(query.page),
                }),
            }
        })
    }

    fn credits<'a>(
        &'a self,
        movie_id: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RawCredits, SourceError>> + Send + 'a>> {
        self.credit_calls.lock().unwrap_or_else(|e| e.into_inner()).push(movie_id);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match self.credits.get(&movie_id) {
                Some(Ok(credits)) => Ok(credits.clone()),
                Some(Err(_)) => Err(SourceError::Status(503)),
                None => Ok(default_credits(movie_id)),
            }
        })
    }
}
