//! Axum REST API handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::balance::Balance;
use crate::composer::{ViewState, ViewStateComposer};
use crate::sync::SyncState;

pub struct ApiState {
    pub composer: Arc<ViewStateComposer>,
    /// Inputs for the balance and sync producers.
    pub balance_tx: watch::Sender<Option<Balance>>,
    pub sync_tx: watch::Sender<Option<SyncState>>,
    pub view_rx: watch::Receiver<Option<ViewState>>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BalanceUpdate {
    /// Base units; signed so a negative value can be rejected explicitly.
    pub balance: i64,
}

#[derive(Serialize)]
pub struct BalanceAccepted {
    pub balance: Balance,
}

#[derive(Serialize)]
pub struct LifecycleResponse {
    pub active: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /view`
///
/// Returns the most recently composed view.
pub async fn get_view(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let latest = state.view_rx.borrow().clone();
    match latest {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => error(StatusCode::NOT_FOUND, "No view composed yet"),
    }
}

/// `POST /view/refresh`
///
/// Recomposes from the current inputs; sync lag grows even when no input changes.
pub async fn refresh_view(State(state): State<Arc<ApiState>>) -> Json<ViewState> {
    Json(state.composer.recompute())
}

/// `PUT /balance`
pub async fn put_balance(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<BalanceUpdate>,
) -> impl IntoResponse {
    match Balance::from_signed(update.balance) {
        Ok(balance) => {
            debug!(%balance, "Balance pushed");
            state.balance_tx.send_replace(Some(balance));
            (StatusCode::ACCEPTED, Json(BalanceAccepted { balance })).into_response()
        }
        Err(e) => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

/// `PUT /sync`
pub async fn put_sync(
    State(state): State<Arc<ApiState>>,
    Json(sync): Json<SyncState>,
) -> impl IntoResponse {
    debug!(
        replaying = sync.replaying,
        impediments = ?sync.impediments.iter().map(|i| i.as_str()).collect::<Vec<_>>(),
        "Sync state pushed"
    );
    state.sync_tx.send_replace(Some(sync));
    StatusCode::ACCEPTED
}

/// `POST /lifecycle/activate`
pub async fn activate(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.composer.activate();
    lifecycle(&state)
}

/// `POST /lifecycle/deactivate`
pub async fn deactivate(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.composer.deactivate();
    lifecycle(&state)
}

/// `POST /lifecycle/teardown`
pub async fn teardown(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.composer.teardown();
    lifecycle(&state)
}

fn lifecycle(state: &ApiState) -> Json<LifecycleResponse> {
    Json(LifecycleResponse {
        active: state.composer.is_active(),
    })
}
