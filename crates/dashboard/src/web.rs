use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::mqtt::{Actuator, TankIndex};
use crate::reconciler::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub dispatcher: Dispatcher,
}

#[derive(Deserialize)]
struct LevelRequest {
    value: i64,
}

#[derive(Serialize)]
struct LevelResponse {
    value: i64,
}

#[derive(Serialize)]
struct ToggleResponse {
    actuator: Actuator,
    on: bool,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/actuators/{name}/toggle", post(toggle_actuator))
        .route("/api/tanks/{index}", put(set_tank_level))
        .route("/api/water-level", put(set_water_level))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let shared = state.reconciler.state();
    let st = shared.read().await;
    Json(st.to_status())
}

async fn toggle_actuator(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ToggleResponse>, StatusCode> {
    let actuator = Actuator::from_name(&name).ok_or(StatusCode::NOT_FOUND)?;
    let on = state.dispatcher.toggle(actuator).await;
    Ok(Json(ToggleResponse { actuator, on }))
}

async fn set_tank_level(
    State(state): State<AppState>,
    Path(index): Path<i64>,
    Json(req): Json<LevelRequest>,
) -> Result<Json<LevelResponse>, StatusCode> {
    let tank = TankIndex::new(index).ok_or(StatusCode::NOT_FOUND)?;
    let value = state.dispatcher.set_tank_level(tank, req.value).await;
    Ok(Json(LevelResponse { value }))
}

async fn set_water_level(
    State(state): State<AppState>,
    Json(req): Json<LevelRequest>,
) -> Json<LevelResponse> {
    let value = state.dispatcher.set_water_level(req.value).await;
    Json(LevelResponse { value })
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "dashboard api listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
