//! HTTP surface of the governance service

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use governance_trait::Actor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::auth::AuthProvider;
use crate::batch::{
    ApproveBatchRequest, BatchAction, BatchActionResponse, BatchEngine, BatchSubmitRequest,
    BatchSubmitResponse, BatchView, RejectBatchRequest,
};
use crate::error::{GovernanceError, Result};
use crate::rate_limit::{
    ExemptionView, OverrideUpdate, OverrideView, RateLimitAdmin, UserRateLimits,
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: BatchEngine,
    pub admin: RateLimitAdmin,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    fn actor(&self, headers: &HeaderMap) -> Result<Actor> {
        self.auth
            .authenticate(headers)?
            .filter(Actor::is_authenticated)
            .ok_or(GovernanceError::Unauthorized)
    }
}

/// Error body returned for every failed request
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.is_internal() {
            error!("Request failed: {}", self);
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.public_message(),
            params: self.params(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after_seconds() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        warn!("Rejected request body: {}", rejection.body_text());
        GovernanceError::InvalidRequest(rejection.body_text())
    })
}

/// Build the router with every governance route
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/vms/batch", post(submit_batch))
        .route("/api/v1/vms/batch/{batch_id}", get(get_batch))
        .route("/api/v1/vms/batch/{batch_id}/actions", post(batch_action))
        .route("/api/v1/admin/vms/batch/{batch_id}/approve", post(approve_batch))
        .route("/api/v1/admin/vms/batch/{batch_id}/reject", post(reject_batch))
        .route("/api/v1/admin/rate-limits/{user_id}", get(get_rate_limits))
        .route(
            "/api/v1/admin/rate-limits/{user_id}/exemption",
            get(get_exemption).put(set_exemption).delete(remove_exemption),
        )
        .route(
            "/api/v1/admin/rate-limits/{user_id}/override",
            put(upsert_override).delete(remove_override),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>> {
    state.engine.database().health_check().await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn submit_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<BatchSubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchSubmitResponse>)> {
    let actor = state.actor(&headers)?;
    let request = body(payload)?;
    let response = state.engine.submit_batch(&actor, request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchView>> {
    let actor = state.actor(&headers)?;
    Ok(Json(state.engine.load_batch_view(&actor, &batch_id).await?))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
}

async fn batch_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
    payload: std::result::Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<BatchActionResponse>> {
    let actor = state.actor(&headers)?;
    let action: BatchAction = body(payload)?.action.parse()?;
    Ok(Json(
        state
            .engine
            .perform_action(&actor, &batch_id, action)
            .await?,
    ))
}

async fn approve_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
    payload: std::result::Result<Json<ApproveBatchRequest>, JsonRejection>,
) -> Result<Json<BatchActionResponse>> {
    let actor = state.actor(&headers)?;
    let request = body(payload)?;
    Ok(Json(
        state
            .engine
            .approve_batch(&actor, &batch_id, request)
            .await?,
    ))
}

async fn reject_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(batch_id): Path<String>,
    payload: std::result::Result<Json<RejectBatchRequest>, JsonRejection>,
) -> Result<Json<BatchActionResponse>> {
    let actor = state.actor(&headers)?;
    let request = body(payload)?;
    Ok(Json(
        state.engine.reject_batch(&actor, &batch_id, request).await?,
    ))
}

async fn get_rate_limits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<UserRateLimits>> {
    let actor = state.actor(&headers)?;
    Ok(Json(state.admin.get_policy(&actor, &user_id).await?))
}

#[derive(Debug, Serialize)]
struct ExemptionResponse {
    user_id: String,
    exemption: Option<ExemptionView>,
}

async fn get_exemption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<ExemptionResponse>> {
    let actor = state.actor(&headers)?;
    let limits = state.admin.get_policy(&actor, &user_id).await?;
    Ok(Json(ExemptionResponse {
        user_id: limits.user_id,
        exemption: limits.exemption,
    }))
}

#[derive(Debug, Deserialize)]
struct ExemptionRequest {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

async fn set_exemption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    payload: std::result::Result<Json<ExemptionRequest>, JsonRejection>,
) -> Result<Json<ExemptionView>> {
    let actor = state.actor(&headers)?;
    let request = body(payload)?;
    Ok(Json(
        state
            .admin
            .set_exemption(&actor, &user_id, request.reason, request.expires_at)
            .await?,
    ))
}

#[derive(Debug, Serialize)]
struct RemovedResponse {
    user_id: String,
    removed: bool,
}

async fn remove_exemption(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<RemovedResponse>> {
    let actor = state.actor(&headers)?;
    let removed = state.admin.remove_exemption(&actor, &user_id).await?;
    Ok(Json(RemovedResponse { user_id, removed }))
}

async fn upsert_override(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    payload: std::result::Result<Json<OverrideUpdate>, JsonRejection>,
) -> Result<Json<OverrideView>> {
    let actor = state.actor(&headers)?;
    let update = body(payload)?;
    Ok(Json(
        state
            .admin
            .upsert_override(&actor, &user_id, update)
            .await?,
    ))
}

async fn remove_override(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<RemovedResponse>> {
    let actor = state.actor(&headers)?;
    let removed = state.admin.remove_override(&actor, &user_id).await?;
    Ok(Json(RemovedResponse { user_id, removed }))
}
