use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use gsecret_core::chain::ForwardChainExecutor;
use gsecret_core::GsecretError;
use gsecret_secret::{GSecretStage, Secret, WriteSecret};

use crate::auth::extract_token;
use crate::error::ApiError;
use crate::state::GsecretApiState;

/// Resolves `{chain}` against the controller and pops the first stage off
/// a fresh executor. Unknown chain or a chain with zero stages both answer
/// 404.
fn first_stage(
    state: &GsecretApiState,
    chain: &str,
) -> Result<(Arc<dyn GSecretStage>, ForwardChainExecutor<dyn GSecretStage>), GsecretError> {
    let mut exec = state
        .chain_controller
        .get_executor(chain)
        .ok_or_else(|| GsecretError::not_found(format!("chain '{chain}' not found")))?;
    let stage = exec
        .next()
        .ok_or_else(|| GsecretError::not_found(format!("chain '{chain}' has no stages")))?;
    Ok((stage, exec))
}

/// `GET /{chain}/key/{key}`
pub async fn get_secret_key(
    State(state): State<GsecretApiState>,
    Path((chain, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = handle_get_secret_key(&state, &chain, &key, &headers).await;
    record(&state, &chain, "get_secret_key", &result, started);
    result
}

async fn handle_get_secret_key(
    state: &GsecretApiState,
    chain: &str,
    key: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let token = extract_token(headers)?;
    let (stage, exec) = first_stage(state, chain)?;
    let secret = stage.get_secret_key(key, &token, exec).await?;
    Ok(secret_response(secret))
}

/// `GET /{chain}/id/{key_id}`
pub async fn get_secret_id(
    State(state): State<GsecretApiState>,
    Path((chain, key_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = handle_get_secret_id(&state, &chain, &key_id, &headers).await;
    record(&state, &chain, "get_secret_id", &result, started);
    result
}

async fn handle_get_secret_id(
    state: &GsecretApiState,
    chain: &str,
    key_id: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let token = extract_token(headers)?;
    let (stage, exec) = first_stage(state, chain)?;
    let secret = stage.get_secret_id(key_id, &token, exec).await?;
    Ok(secret_response(secret))
}

/// `POST /{chain}/write`
pub async fn write_secret(
    State(state): State<GsecretApiState>,
    Path(chain): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WriteSecret>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = handle_write_secret(&state, &chain, &headers, &body).await;
    record(&state, &chain, "write_secret", &result, started);
    result
}

async fn handle_write_secret(
    state: &GsecretApiState,
    chain: &str,
    headers: &HeaderMap,
    body: &WriteSecret,
) -> Result<Response, ApiError> {
    if state.write_blocked {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"detail": "Not Supported"})),
        )
            .into_response());
    }

    let token = extract_token(headers)?;
    let (stage, exec) = first_stage(state, chain)?;
    let secret = stage.write_secret(body, &token, exec).await?;
    Ok(secret_response(secret))
}

fn record(
    state: &GsecretApiState,
    chain: &str,
    operation: &str,
    result: &Result<Response, ApiError>,
    started: Instant,
) {
    let status = match result {
        Ok(response) => response.status().as_u16(),
        Err(err) => err.status_code().as_u16(),
    };
    state.metrics.record_request(
        chain,
        operation,
        status,
        started.elapsed().as_secs_f64(),
    );
}

fn secret_response(secret: Secret) -> Response {
    (StatusCode::OK, Json(secret)).into_response()
}
