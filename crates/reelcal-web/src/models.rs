use std::collections::BTreeMap;

use reelcal_core::Release;
use reelcal_core::poster::{DEFAULT_POSTER_SIZE, poster_url};
use serde::{Deserialize, Serialize};

/// Shown to the client when no usable TMDB key is configured.
pub const MISSING_KEY_ERROR: &str = "TMDB API key not configured";

/// `GET /api/calendar` query string. Missing fields default to the current
/// month.
#[derive(Debug, Default, Deserialize)]
pub struct CalendarQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

/// A release plus the ready-to-use poster URL (placeholder when missing).
#[derive(Debug, Serialize)]
pub struct MovieView<'a> {
    #[serde(flatten)]
    pub release: &'a Release,
    pub poster_url: String,
}

impl<'a> From<&'a Release> for MovieView<'a> {
    fn from(release: &'a Release) -> Self {
        Self {
            release,
            poster_url: poster_url(release.poster_path.as_deref(), DEFAULT_POSTER_SIZE),
        }
    }
}

pub fn views(releases: &[Release]) -> Vec<MovieView<'_>> {
    releases.iter().map(MovieView::from).collect()
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse<'a> {
    pub title: String,
    pub year: i32,
    pub month: u32,
    pub movies: Vec<MovieView<'a>>,
    pub by_date: BTreeMap<&'a str, Vec<MovieView<'a>>>,
    /// Empty unless the API key is missing.
    pub error: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_adds_poster_url_next_to_release_fields() {
        let with_poster = Release {
            id: 4,
            title: "Framed".into(),
            poster_path: Some("/framed.jpg".into()),
            ..Release::default()
        };
        let without = Release {
            id: 5,
            ..Release::default()
        };

        let json = serde_json::to_value(views(&[with_poster, without])).unwrap();
        assert_eq!(json[0]["id"], 4);
        assert_eq!(json[0]["poster_path"], "/framed.jpg");
        assert_eq!(
            json[0]["poster_url"],
            "https://image.tmdb.org/t/p/w200/framed.jpg"
        );
        assert!(json[1]["poster_path"].is_null());
        assert!(
            json[1]["poster_url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/svg+xml,")
        );
    }
}
