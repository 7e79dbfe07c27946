//! Poster image URLs.

use std::sync::LazyLock;

pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";
pub const DEFAULT_POSTER_SIZE: &str = "w200";

const NO_POSTER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="300" viewBox="0 0 200 300"><rect width="200" height="300" fill="#e8e8ed" rx="8"/><text x="100" y="140" text-anchor="middle" fill="#8e8e93" font-family="system-ui" font-size="14">No Poster</text><text x="100" y="165" text-anchor="middle" fill="#8e8e93" font-family="system-ui" font-size="24">🎬</text></svg>"##;

/// Inline SVG placeholder for releases without a poster.
pub static NO_POSTER: LazyLock<String> = LazyLock::new(|| {
    format!("data:image/svg+xml,{}", urlencoding::encode(NO_POSTER_SVG))
});

/// Image URL for `path` at `size` (e.g. `w200`, `w500`), or the placeholder.
pub fn poster_url(path: Option<&str>, size: &str) -> String {
    match path.filter(|p| !p.is_empty()) {
        Some(path) => format!("{IMAGE_BASE_URL}/{size}{path}"),
        None => NO_POSTER.clone(),
    }
}
