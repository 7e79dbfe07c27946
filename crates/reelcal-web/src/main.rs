use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use reelcal_core::{build_fetcher, config_file};

mod handlers;
mod models;
mod state;

use state::AppState;

fn app(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route(
            "/api/calendar",
            axum::routing::get(handlers::calendar::calendar),
        )
        .route("/health", axum::routing::get(handlers::health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config_file::resolve();
    tracing::info!(?config, "starting");
    if !config.has_api_key() {
        tracing::warn!("TMDB_API_KEY not set, add it to .env; calendar responses will be empty");
    }

    let state = Arc::new(AppState {
        fetcher: build_fetcher(&config),
        api_key_configured: config.has_api_key(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
