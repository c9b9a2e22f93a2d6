use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use keygate_core::{EncryptionService, KeyPool, ModelRegistry, PlaygroundExecutor, PlaygroundRequest};
use keygate_storage::{ModelPatch, NewGroup, Storage};

use crate::response::ApiError;

const DEFAULT_STALE_HOURS: u64 = 24;

#[derive(Clone)]
pub struct AdminState {
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<ModelRegistry>,
    pub key_pool: Arc<KeyPool>,
    pub playground: Arc<PlaygroundExecutor>,
    pub encryption: Arc<dyn EncryptionService>,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/playground/chat", post(playground_chat))
        .route("/models/fetch", post(fetch_models))
        .route("/models/group/{groupId}", get(list_models))
        .route("/models/group/{groupId}/refresh", post(refresh_models))
        .route(
            "/models/{modelId}",
            get(get_model).put(update_model).delete(delete_model),
        )
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/{groupId}", axum::routing::delete(delete_group))
        .route("/groups/{groupId}/keys", get(list_keys).post(add_keys))
        .route("/keys/{keyId}/validate", post(validate_key))
        .route("/keys/{keyId}/restore", post(restore_key))
        .route("/metrics", get(metrics))
        .with_state(state)
}

fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_json",
            message: rejection.body_text(),
        }),
    }
}

// ---- Playground ----

async fn playground_chat(
    State(state): State<AdminState>,
    body: Result<Json<PlaygroundRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = payload(body)?;
    if req.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    let reply = state.playground.chat(req).await?;
    Ok(Json(reply).into_response())
}

// ---- Models ----

#[derive(Deserialize)]
struct FetchModelsRequest {
    group_id: i64,
}

async fn fetch_models(
    State(state): State<AdminState>,
    body: Result<Json<FetchModelsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = payload(body)?;
    let group = state
        .storage
        .get_group(req.group_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("group {}", req.group_id)))?;

    let (_key, plaintext) = state.key_pool.acquire(&group).await?;
    if let Err(err) = state.registry.fetch_and_store(&group, &plaintext).await {
        warn!(group = %group.name, error = %err, "model fetch failed");
        return Err(err.into());
    }

    let models = state.registry.list(group.id).await?;
    Ok(Json(json!({ "models": models, "count": models.len() })).into_response())
}

async fn list_models(
    State(state): State<AdminState>,
    Path(group_id): Path<i64>,
) -> Result<Response, ApiError> {
    let models = state.registry.list(group_id).await?;
    Ok(Json(json!({ "models": models, "count": models.len() })).into_response())
}

#[derive(Deserialize)]
struct RefreshParams {
    stale_hours: Option<u64>,
}

async fn refresh_models(
    State(state): State<AdminState>,
    Path(group_id): Path<i64>,
    Query(params): Query<RefreshParams>,
) -> Result<Response, ApiError> {
    let group = state
        .storage
        .get_group(group_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("group {group_id}")))?;

    let stale_hours = params
        .stale_hours
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_STALE_HOURS);

    let (_key, plaintext) = state.key_pool.acquire(&group).await?;
    state
        .registry
        .refresh_stale(&group, &plaintext, Duration::from_secs(stale_hours * 3600))
        .await?;

    let models = state.registry.list(group.id).await?;
    Ok(Json(json!({ "models": models, "count": models.len() })).into_response())
}

async fn get_model(
    State(state): State<AdminState>,
    Path(model_id): Path<i64>,
) -> Result<Response, ApiError> {
    let model = state
        .registry
        .get(model_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("model {model_id}")))?;
    Ok(Json(model).into_response())
}

async fn update_model(
    State(state): State<AdminState>,
    Path(model_id): Path<i64>,
    body: Result<Json<ModelPatch>, JsonRejection>,
) -> Result<Response, ApiError> {
    let patch = payload(body)?;
    let model = state
        .registry
        .patch(model_id, &patch)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("model {model_id}")))?;
    Ok(Json(model).into_response())
}

async fn delete_model(
    State(state): State<AdminState>,
    Path(model_id): Path<i64>,
) -> Result<Response, ApiError> {
    state.registry.delete(model_id).await?;
    Ok(Json(json!({ "message": "model deleted" })).into_response())
}

// ---- Groups ----

async fn list_groups(State(state): State<AdminState>) -> Result<Response, ApiError> {
    let groups = state
        .storage
        .list_groups()
        .await
        .map_err(keygate_core::CoreError::from)?;
    Ok(Json(json!({ "groups": groups, "count": groups.len() })).into_response())
}

async fn create_group(
    State(state): State<AdminState>,
    body: Result<Json<NewGroup>, JsonRejection>,
) -> Result<Response, ApiError> {
    let group = payload(body)?;
    if group.name.trim().is_empty() {
        return Err(ApiError::bad_request("group name must not be empty"));
    }
    if group.upstreams.is_empty() {
        return Err(ApiError::bad_request("group needs at least one upstream"));
    }
    let id = state
        .storage
        .insert_group(&group)
        .await
        .map_err(keygate_core::CoreError::from)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

async fn delete_group(
    State(state): State<AdminState>,
    Path(group_id): Path<i64>,
) -> Result<Response, ApiError> {
    state
        .storage
        .delete_group(group_id)
        .await
        .map_err(keygate_core::CoreError::from)?;
    Ok(Json(json!({ "message": "group deleted" })).into_response())
}

// ---- Keys ----

async fn list_keys(
    State(state): State<AdminState>,
    Path(group_id): Path<i64>,
) -> Result<Response, ApiError> {
    let keys = state
        .storage
        .list_keys(group_id)
        .await
        .map_err(keygate_core::CoreError::from)?;
    Ok(Json(json!({ "keys": keys, "count": keys.len() })).into_response())
}

#[derive(Deserialize)]
struct AddKeysRequest {
    keys: Vec<String>,
}

async fn add_keys(
    State(state): State<AdminState>,
    Path(group_id): Path<i64>,
    body: Result<Json<AddKeysRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = payload(body)?;
    if req.keys.is_empty() {
        return Err(ApiError::bad_request("keys must not be empty"));
    }
    let group = state
        .storage
        .get_group(group_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("group {group_id}")))?;

    let mut ciphertexts = Vec::with_capacity(req.keys.len());
    for key in &req.keys {
        let ciphertext = state.encryption.encrypt(key).map_err(|err| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "encryption_failure",
            message: err.to_string(),
        })?;
        ciphertexts.push(ciphertext);
    }

    let ids = state
        .storage
        .insert_keys(group_id, &ciphertexts)
        .await
        .map_err(keygate_core::CoreError::from)?;
    state.key_pool.refresh_gauges(&group).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ids": ids, "count": ids.len() })),
    )
        .into_response())
}

async fn validate_key(
    State(state): State<AdminState>,
    Path(key_id): Path<i64>,
) -> Result<Response, ApiError> {
    let key = state
        .storage
        .get_key(key_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("key {key_id}")))?;
    let group = state
        .storage
        .get_group(key.group_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("group {}", key.group_id)))?;

    let outcome = state.key_pool.validate(&group, &key).await?;
    Ok(Json(json!({ "valid": outcome.valid, "reason": outcome.reason })).into_response())
}

async fn restore_key(
    State(state): State<AdminState>,
    Path(key_id): Path<i64>,
) -> Result<Response, ApiError> {
    let key = state
        .storage
        .get_key(key_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("key {key_id}")))?;
    let group = state
        .storage
        .get_group(key.group_id)
        .await
        .map_err(keygate_core::CoreError::from)?
        .ok_or_else(|| ApiError::not_found(format!("group {}", key.group_id)))?;

    state.key_pool.mark_active(&group, key.id).await?;
    Ok(Json(json!({ "status": "active" })).into_response())
}

// ---- Metrics ----

async fn metrics() -> Result<Response, ApiError> {
    let text = keygate_metrics::gather().map_err(|err| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "metrics_error",
        message: err.to_string(),
    })?;
    Ok((
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        text,
    )
        .into_response())
}
