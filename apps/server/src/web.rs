use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::controller::{Controller, Snapshot};

// Shared between the tick loop and the web server
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RwLock<Controller>>,
    pub dashboard_dir: PathBuf,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    since: Option<i64>,
}

#[derive(Deserialize)]
pub struct TargetsRequest {
    low: Option<f64>,
    high: Option<f64>,
}

#[derive(Deserialize)]
pub struct ScheduleRequest {
    start_hour: f64,
    end_hour: f64,
}

#[derive(Deserialize)]
pub struct SwitchRequest {
    on: bool,
}

#[derive(Deserialize)]
pub struct DisplayRequest {
    hours: f64,
}

pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(&state.dashboard_dir);
    Router::new()
        .route("/", get(serve_dashboard))
        .route("/api/status", get(get_status))
        .route("/api/targets", post(set_targets))
        .route("/api/schedule", post(set_schedule))
        .route("/api/hot_water", post(set_hot_water))
        .route("/api/heating", post(set_heating))
        .route("/api/display", post(set_display))
        .nest_service("/static", assets)
        .layer(ServiceBuilder::new().layer(CompressionLayer::new()))
        .with_state(state)
}

pub async fn create_web_server(state: AppState, bind: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("web server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn serve_dashboard(State(state): State<AppState>) -> Response {
    let index = state.dashboard_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(content) => Html(content).into_response(),
        Err(e) => {
            warn!(path = %index.display(), error = %e, "no dashboard page");
            (StatusCode::NOT_FOUND, "dashboard not installed").into_response()
        }
    }
}

async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<Snapshot> {
    let controller = state.controller.read().await;
    Json(controller.snapshot(query.since))
}

fn reply(result: anyhow::Result<()>) -> (StatusCode, Json<serde_json::Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}

async fn set_targets(
    State(state): State<AppState>,
    Json(request): Json<TargetsRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut controller = state.controller.write().await;
    reply(controller.set_targets(request.low, request.high))
}

async fn set_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut controller = state.controller.write().await;
    reply(controller.set_schedule(request.start_hour, request.end_hour))
}

async fn set_hot_water(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.controller.write().await.set_hot_water(request.on);
    reply(Ok(()))
}

async fn set_heating(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.controller.write().await.set_heating_override(request.on);
    reply(Ok(()))
}

async fn set_display(
    State(state): State<AppState>,
    Json(request): Json<DisplayRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut controller = state.controller.write().await;
    reply(controller.set_display_hours(request.hours))
}
