use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use poller_actor::ServiceHandle;
use types::{LinkStatus, SensorName, SensorReading, SwitchState, Target};

#[derive(Clone)]
pub struct HttpState {
    pub service: ServiceHandle,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
struct StateBody {
    target: Target,
    state: SwitchState,
}

#[derive(Debug, Serialize)]
struct ToggleBody {
    target: Target,
    command: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    link: LinkStatus,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/sensors", get(list_sensors))
        .route("/sensors/:name", get(read_sensor))
        .route("/states/:target", get(read_state))
        .route("/states/:target/toggle", post(toggle))
        .route("/status", get(link_status))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: HttpState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind http listener {addr}"))?;
    info!(%addr, "http listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .context("http server failed")
}

async fn list_sensors(State(state): State<HttpState>) -> Json<Vec<SensorReading>> {
    Json(state.service.snapshot())
}

async fn read_sensor(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    match name.parse::<SensorName>() {
        Ok(name) => Json(state.service.reading(name)).into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn read_state(State(state): State<HttpState>, Path(target): Path<String>) -> Response {
    match target.parse::<Target>() {
        Ok(target) => Json(StateBody {
            target,
            state: state.service.read_state(target),
        })
        .into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn toggle(State(state): State<HttpState>, Path(target): Path<String>) -> Response {
    let target = match target.parse::<Target>() {
        Ok(target) => target,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };

    state.service.request_toggle(target);
    match state.service.pending(target) {
        Some(command) => (
            StatusCode::ACCEPTED,
            Json(ToggleBody {
                target,
                command: command.name(),
            }),
        )
            .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn link_status(State(state): State<HttpState>) -> Json<StatusBody> {
    Json(StatusBody {
        link: state.service.link(),
    })
}

async fn render_metrics(State(state): State<HttpState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
