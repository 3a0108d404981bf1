use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::time::Duration;

use axum::{
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::info;

use super::generation_routes::{make_generation_routes, CACHE_ROUTE_PREFIX};
use super::metrics::metrics_handler;
use super::state::ServerState;
use super::stream_asset::stream_cached_asset;
use super::{http_cache, log_requests};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
    pub active_jobs: usize,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
        active_jobs: state.jobs.active_count(),
    };
    Json(stats)
}

pub fn make_app(state: ServerState) -> Router {
    let config = state.config.clone();

    let cache_routes: Router = Router::new()
        .route("/{filename}", get(stream_cached_asset))
        .layer(middleware::from_fn_with_state(
            config.content_cache_age_sec,
            http_cache,
        ))
        .with_state(state.clone());

    let status_routes: Router = Router::new()
        .route("/status", get(home))
        .with_state(state.clone());

    let home_router: Router = match config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .merge(status_routes)
        .nest(CACHE_ROUTE_PREFIX, cache_routes)
        .nest("/music", make_generation_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state, log_requests))
}

/// Serves the application on `listener` until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = make_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")
}

pub async fn run_server(state: ServerState) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let shutdown = state.shutdown.clone();

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    let metrics_app = Router::new().route("/metrics", get(metrics_handler));
    let metrics_server = axum::serve(metrics_listener, metrics_app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });

    info!("Listening on port {}, metrics on port {}", port, metrics_port);
    tokio::try_join!(serve(listener, state), async {
        metrics_server
            .into_future()
            .await
            .context("Metrics server failed")
    })?;
    Ok(())
}
