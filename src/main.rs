//! Solar Sentiment Analyzer — Binary Entrypoint
//! Boots the Axum HTTP server, wiring routes, shared state, and middleware.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use solar_sentiment_analyzer::api::{create_router, AppState};
use solar_sentiment_analyzer::config::AppConfig;
use solar_sentiment_analyzer::metrics::Metrics;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - SOLAR_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("SOLAR_DEV_LOG").ok().is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("solar_sentiment_analyzer=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments. Supplies
    // OPENAI_API_KEY and optional config overrides.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let cfg = AppConfig::load_or_default("config/app.json");
    let state = AppState::from_config(&cfg);

    let metrics = Metrics::init();
    let router = create_router(state).merge(metrics.router());

    Ok(router.into())
}
