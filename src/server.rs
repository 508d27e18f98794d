//! HTTP API serving the dashboard snapshot.
use crate::core::config::AppConfig;
use crate::core::model::DashboardSnapshot;
use crate::dashboard::{Sources, collect_snapshot};
use crate::present::DashboardView;
use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Result of the most recent aggregation.
struct Completed {
    finished_at: Instant,
    snapshot: Arc<DashboardSnapshot>,
}

#[derive(Clone)]
pub struct AppState {
    sources: Sources,
    config: Arc<AppConfig>,
    // Held by the running aggregation, so at most one runs at a time.
    latest: Arc<Mutex<Option<Completed>>>,
}

impl AppState {
    pub fn new(sources: Sources, config: AppConfig) -> Self {
        AppState {
            sources,
            config: Arc::new(config),
            latest: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a snapshot at least as new as the call.
    ///
    /// Callers that queued behind a running aggregation reuse its result
    /// instead of starting another one. The aggregation owns the guard, so
    /// its result is stored even if the caller goes away.
    pub async fn snapshot(&self) -> Result<Arc<DashboardSnapshot>> {
        let requested_at = Instant::now();
        let mut latest = Arc::clone(&self.latest).lock_owned().await;
        if let Some(done) = latest.as_ref() {
            if done.finished_at >= requested_at {
                debug!("Reusing aggregation that finished while waiting");
                return Ok(Arc::clone(&done.snapshot));
            }
        }

        let sources = self.sources.clone();
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            let snapshot = Arc::new(collect_snapshot(&sources, &config, Utc::now()).await);
            *latest = Some(Completed {
                finished_at: Instant::now(),
                snapshot: Arc::clone(&snapshot),
            });
            snapshot
        })
        .await
        .map_err(|e| anyhow!("Dashboard aggregation aborted: {e}"))
    }
}

/// Maps an unexpected failure to a generic 500; the detail is only logged.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Error fetching dashboard data");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to fetch dashboard data" })),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/dashboard", get(dashboard))
        .route("/api/dashboard/view", get(dashboard_view))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardSnapshot>, ApiError> {
    let snapshot = state.snapshot().await?;
    Ok(Json(snapshot.as_ref().clone()))
}

async fn dashboard_view(State(state): State<AppState>) -> Result<Json<DashboardView>, ApiError> {
    let snapshot = state.snapshot().await?;
    Ok(Json(DashboardView::from_snapshot(&snapshot)))
}

/// Serves the API on the configured bind address until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!(addr = %bind, "Dashboard API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}
