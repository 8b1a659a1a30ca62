pub mod error;
pub mod handlers;
pub mod state;
pub mod types;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(|| async { "ok" }))
        // Screener tables
        .route("/api/v1/screener", get(handlers::screener::list_tables))
        .route("/api/v1/screener/metadata", get(handlers::screener::get_metadata))
        .route("/api/v1/screener/{table}", get(handlers::screener::get_table))
        // Admin
        .route("/api/v1/admin/interval", post(handlers::admin::set_interval))
        .route(
            "/api/v1/admin/calendar-thresholds",
            post(handlers::admin::set_calendar_thresholds),
        )
        .route("/api/v1/admin/skew-benchmark", post(handlers::admin::override_skew_benchmark))
        .route("/api/v1/admin/vol-benchmark", post(handlers::admin::override_vol_benchmark))
        .route("/api/v1/admin/login", post(handlers::admin::login))
        .route("/api/v1/admin/is-logged-in", get(handlers::admin::is_logged_in))
        .route("/api/v1/admin/expiries", get(handlers::admin::expiries))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = router(state);

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "screener API listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    axum::serve(listener, app).await.context("running server")?;

    Ok(())
}
