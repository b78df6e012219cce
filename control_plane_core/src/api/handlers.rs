//! API request handlers.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value;

use control_plane_shared_types::ConfigMap;

use super::error::{ApiError, ApiResult};
use super::state::ApiState;

/// Configuration bodies are flat JSON objects. Strings are taken as-is,
/// numbers and booleans by their JSON text, `null` as an empty value.
fn config_from_json(body: BTreeMap<String, Value>) -> ApiResult<ConfigMap> {
    body.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ApiError::validation_error(format!(
                        "value of '{}' must be a string, number or boolean",
                        key
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

// ============================================================================
// Server Handlers
// ============================================================================

/// Server CLI status, dependency health and per-server state.
pub async fn get_status(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let report = state.control_plane.status().await?;
    Ok(Json(report))
}

pub async fn start_server(
    State(state): State<ApiState>,
    Path(server_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.control_plane.start(&server_type).await?;
    Ok(Json(report))
}

pub async fn stop_server(
    State(state): State<ApiState>,
    Path(server_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.control_plane.stop(&server_type).await?;
    Ok(Json(report))
}

// ============================================================================
// Configuration Handlers
// ============================================================================

pub async fn get_settings(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let report = state.control_plane.settings().await?;
    Ok(Json(report))
}

pub async fn get_config(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let report = state.control_plane.get_config().await?;
    Ok(Json(report))
}

pub async fn save_config(
    State(state): State<ApiState>,
    body: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let report = state.control_plane.save_config(config_from_json(body)?).await?;
    Ok(Json(report))
}

pub async fn setup(
    State(state): State<ApiState>,
    body: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let report = state.control_plane.setup(config_from_json(body)?).await?;
    Ok(Json(report))
}

pub async fn validate_credentials(
    State(state): State<ApiState>,
    body: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let envelope = state
        .control_plane
        .validate_credentials(config_from_json(body)?)
        .await?;
    Ok(Json(envelope))
}

// ============================================================================
// Playbook Handlers
// ============================================================================

/// Run a playbook. The body holds its variables; an empty body means none.
pub async fn run_playbook(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let vars = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::validation_error(format!("invalid playbook variables: {}", e)))?
    };
    let report = state.control_plane.run_playbook(&name, vars).await?;
    Ok(Json(report))
}
