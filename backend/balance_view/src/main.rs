//! Wallet balance view entry point.
//!
//! Composes the wallet balance, a fetched exchange rate and the blockchain
//! sync status into one display state. Balance and sync status are pushed in
//! over a small Axum REST API, which also serves the latest composed view and
//! controls the composer's lifecycle.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use balance_view::api;
use balance_view::composer::{Producers, RateUpdate, ViewStateComposer};
use balance_view::config::Config;
use balance_view::producers::{Producer, RatePoller, WatchProducer};
use balance_view::render::{SystemClock, ViewPublisher};
use balance_view::ticker::ExchangeRateFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // ─── Producers ────────────────────────────────────────
    let (balance_tx, balance_rx) = watch::channel(None);
    let (sync_tx, sync_rx) = watch::channel(None);

    let rate: Option<Arc<dyn Producer<RateUpdate>>> = if config.show_local_balance {
        let fetcher = ExchangeRateFetcher::new(config.ticker_endpoint(), config.fetch_timeout())?;
        Some(Arc::new(RatePoller::new(
            fetcher,
            config.rate_poll_interval(),
        )))
    } else {
        info!("Local balance disabled; exchange rate will not be fetched");
        None
    };

    let producers = Producers {
        balance: Arc::new(WatchProducer::new(balance_rx)),
        rate,
        sync: Arc::new(WatchProducer::new(sync_rx)),
    };

    // ─── Composer ─────────────────────────────────────────
    let (publisher, view_rx) = ViewPublisher::new();
    let composer = Arc::new(ViewStateComposer::new(
        producers,
        Arc::new(publisher),
        Arc::new(SystemClock),
    ));
    composer.activate();

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        composer: Arc::clone(&composer),
        balance_tx,
        sync_tx,
        view_rx,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/view", get(api::get_view))
        .route("/view/refresh", post(api::refresh_view))
        .route("/balance", put(api::put_balance))
        .route("/sync", put(api::put_sync))
        .route("/lifecycle/activate", post(api::activate))
        .route("/lifecycle/deactivate", post(api::deactivate))
        .route("/lifecycle/teardown", post(api::teardown))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    composer.teardown();
    info!("Shut down");

    Ok(())
}
