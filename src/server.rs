//! HTTP control surface: status and the manual generator triggers.

use std::{sync::Arc, time::Duration};

use axum::{
    Json,
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    core::{
        generator::{GeneratorAutomation, GeneratorStatus},
        power_loss::{PowerLossProtection, PowerLossState},
        shutdown::Shutdown,
    },
    prelude::*,
};

#[derive(Clone, Default)]
pub struct AppState {
    pub generator: Option<Arc<GeneratorAutomation>>,
    pub power_loss: Option<Arc<PowerLossProtection>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generator", get(get_generator))
        .route("/generator/start", post(start_generator))
        .route("/generator/stop", post(stop_generator))
        .route("/power-loss", get(get_power_loss))
        .with_state(state)
        .layer((TraceLayer::new_for_http(), TimeoutLayer::new(Duration::from_secs(10))))
}

#[instrument(skip_all, fields(bind_address = bind_address))]
pub async fn serve(bind_address: &str, state: AppState, mut shutdown: Shutdown) -> Result {
    let listener =
        TcpListener::bind(bind_address).await.context("failed to bind to the address")?;
    info!("serving…");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.requested().await })
        .await
        .context("the server has failed")?;
    info!("server stopped");
    Ok(())
}

async fn get_generator(
    State(state): State<AppState>,
) -> Result<Json<GeneratorStatus>, StatusCode> {
    let generator = state.generator.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(generator.status().await))
}

/// The manual triggers may take longer than the request timeout, hence they run detached.
#[instrument(skip_all)]
async fn start_generator(State(state): State<AppState>) -> StatusCode {
    let Some(generator) = state.generator else {
        return StatusCode::NOT_FOUND;
    };
    info!("manual start requested");
    tokio::spawn(async move { generator.start_auto_charge().await });
    StatusCode::ACCEPTED
}

#[instrument(skip_all)]
async fn stop_generator(State(state): State<AppState>) -> StatusCode {
    let Some(generator) = state.generator else {
        return StatusCode::NOT_FOUND;
    };
    info!("manual stop requested");
    tokio::spawn(async move { generator.stop_auto_charge().await });
    StatusCode::ACCEPTED
}

async fn get_power_loss(
    State(state): State<AppState>,
) -> Result<Json<PowerLossState>, StatusCode> {
    let power_loss = state.power_loss.ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(power_loss.status().await))
}
