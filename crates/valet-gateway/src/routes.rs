//! API route handlers for the gateway.
//!
//! Success responses wrap their payload in `{"data": ...}`; failures carry
//! `{"message": ...}` with a 4xx status.

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;
use valet_core::config::ValetConfig;

type ApiResult = std::result::Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn data(value: serde_json::Value) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": value }))
}

fn bad_request(message: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "message": message.to_string() })),
    )
}

fn server_error(message: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "message": message.to_string() })),
    )
}

/// Health check endpoint (public).
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "valet-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Serialize the config with the admin password blanked out.
fn sanitized(config: &ValetConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("admin_password".into(), serde_json::Value::String(String::new()));
    }
    value
}

/// Get current configuration (password masked).
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult {
    let cfg = state
        .config
        .lock()
        .map_err(|_| server_error("Config lock poisoned"))?;
    Ok(Json(serde_json::json!({
        "data": sanitized(&cfg),
        "meta": { "adminPasswordSet": !cfg.admin_password.is_empty() },
    })))
}

/// Deep-merge `incoming` over `base`: objects merge recursively, everything
/// else is replaced.
fn merge_values(base: &mut serde_json::Value, incoming: serde_json::Value) {
    match (base, incoming) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Update configuration. Partial bodies merge over the current settings; an
/// empty password field keeps the current password. Saved to disk, applied
/// on restart.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let mut cfg = state
        .config
        .lock()
        .map_err(|_| server_error("Config lock poisoned"))?;

    let mut merged = serde_json::to_value(&*cfg).map_err(server_error)?;
    merge_values(&mut merged, body);
    let mut next: ValetConfig = serde_json::from_value(merged).map_err(bad_request)?;
    if next.admin_password.is_empty() {
        next.admin_password = cfg.admin_password.clone();
    }

    next.save_to(&state.config_path).map_err(server_error)?;
    *cfg = next;
    tracing::info!("💾 Config updated via admin API");

    Ok(Json(serde_json::json!({
        "data": sanitized(&cfg),
        "meta": { "saved": true, "restartRequired": true },
    })))
}

pub async fn bot_status(State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.lifecycle.status().await;
    Ok(data(serde_json::to_value(status).map_err(server_error)?))
}

pub async fn bot_start(State(state): State<Arc<AppState>>) -> ApiResult {
    match state.lifecycle.start().await {
        Ok(status) => Ok(data(serde_json::to_value(status).map_err(server_error)?)),
        Err(e) => Err(bad_request(e)),
    }
}

pub async fn bot_stop(State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.lifecycle.stop().await;
    Ok(data(serde_json::to_value(status).map_err(server_error)?))
}

pub async fn worker_status(State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.supervisor.status().await;
    Ok(data(serde_json::to_value(status).map_err(server_error)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkerStartRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Launch the worker. The request body may carry a one-off artifact URL and
/// port; otherwise the configured defaults apply.
pub async fn worker_start(
    State(state): State<Arc<AppState>>,
    body: Option<Json<WorkerStartRequest>>,
) -> ApiResult {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let (url, port) = {
        let cfg = state
            .config
            .lock()
            .map_err(|_| server_error("Config lock poisoned"))?;
        (
            request.url.unwrap_or_else(|| cfg.worker.binary_url.clone()),
            request.port.or(cfg.worker.port),
        )
    };
    match state.supervisor.start(&url, port).await {
        Ok(status) => Ok(data(serde_json::to_value(status).map_err(server_error)?)),
        Err(e) => Err(bad_request(e)),
    }
}

pub async fn worker_stop(State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.supervisor.stop().await;
    Ok(data(serde_json::to_value(status).map_err(server_error)?))
}

/// Report the externally assigned port, when the host platform injects one.
pub async fn env_info() -> Json<serde_json::Value> {
    let port = ["PORT", "SERVER_PORT", "PTERODACTYL_PORT"]
        .iter()
        .find_map(|name| std::env::var(name).ok());
    Json(serde_json::json!({ "data": { "port": port } }))
}
