use reelcal_core::ReleaseFetcher;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub fetcher: ReleaseFetcher,
    /// Whether a usable TMDB key was configured; drives the `error` hint.
    pub api_key_configured: bool,
}
