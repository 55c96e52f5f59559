//! Trip Core Backend — HTTP process entry point.
//!
//! Wires the signal pipeline, fairness engine, pivot/cascade flow, and
//! shadow ranker behind a minimal axum surface. The product-facing routers
//! (trip CRUD, invites, itinerary editing) live in the Next.js layer this
//! service sits behind; what's exposed here is health/readiness plus the
//! admin HMAC-gated maintenance endpoints this crate owns directly.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tripcore_backend::{
    admin::{verify_admin_hmac, AdminHmacRequest},
    db::Db,
    error::ApiError,
    ranking::apply_cant_miss_floor,
    shadow::ShadowRunner,
    weather::{WeatherCache, WeatherService},
    Config,
};

#[derive(Clone)]
struct AppState {
    db: Db,
    config: Arc<Config>,
    weather: Arc<WeatherService>,
    shadow: Arc<ShadowRunner>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
}

async fn healthz() -> Json<HealthBody> {
    Json(HealthBody { status: "ok", service: "tripcore-backend" })
}

async fn readyz(State(state): State<AppState>) -> Result<Json<HealthBody>, ApiError> {
    state
        .db
        .with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(())).map_err(Into::into))
        .map_err(|err| ApiError::Unavailable(err.to_string()))?;
    Ok(Json(HealthBody { status: "ready", service: "tripcore-backend" }))
}

#[derive(Serialize)]
struct CantMissFloorResponse {
    success: bool,
    boosted: Vec<String>,
}

/// Admin endpoint: re-apply the cantMiss score floor to a candidate set.
/// Gated by `verify_admin_hmac` — the proxy in front of this service is the
/// only caller expected to hold the shared HMAC secret.
async fn admin_apply_cant_miss_floor(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<CantMissFloorResponse>, ApiError> {
    let secret = state
        .config
        .admin_hmac_secret
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("admin HMAC secret not configured".to_string()))?;

    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let req = AdminHmacRequest {
        method: "POST",
        path: "/admin/ranking/cant-miss-floor",
        query_string: "",
        body: &body,
        signature: header_str("x-admin-signature"),
        timestamp: header_str("x-admin-timestamp"),
        user_id: header_str("x-admin-user-id"),
        body_hash: header_str("x-admin-body-hash"),
    };

    let actor = verify_admin_hmac(&req, secret, chrono::Utc::now().timestamp())
        .map_err(|err| ApiError::Unauthorized(err.to_string()))?;

    let mut candidates: Vec<tripcore_backend::ranking::RankedCandidate> =
        serde_json::from_slice(&body).map_err(|err| ApiError::Input(err.to_string()))?;

    let boosted = apply_cant_miss_floor(&state.db, &mut candidates);
    info!(actor = %actor, boosted = boosted.len(), "admin applied cant-miss floor");

    Ok(Json(CantMissFloorResponse { success: true, boosted }))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/admin/ranking/cant-miss-floor", post(admin_apply_cant_miss_floor))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let config = Arc::new(Config::from_env().context("loading configuration")?);
    info!(port = config.port, "tripcore-backend starting");

    let db = Db::open(&config.database_path).context("opening sqlite database")?;

    let weather_cache = WeatherCache::new();
    let weather = Arc::new(WeatherService::new(config.weather_api_key.clone(), weather_cache));

    let shadow = Arc::new(ShadowRunner::new(db.clone(), config.shadow_mode_enabled, None));

    if config.admin_hmac_secret.is_none() {
        warn!("ADMIN_HMAC_SECRET not set — admin endpoints will return 503");
    }

    let state = AppState { db, config: config.clone(), weather, shadow };
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tripcore_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
