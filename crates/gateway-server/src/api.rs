//! Jupyter REST surface, one route tree per `server:NAMESPACE` path segment.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::ids::{ConnectionId, KernelId, SessionId};
use gateway_core::kernel::{CreateSession, Kernel, KernelSpecs, Session};
use gateway_core::{GatewayError, NamespaceKey};
use gateway_kernel::{ChannelContext, NamespaceRegistry};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::channels::serve_channels;
use crate::server::AppState;

/// Error body every failing route answers with.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    short_message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, short_message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            short_message: short_message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BADREQUEST")
    }

    /// A route the gateway knows about but does not implement.
    pub fn todo(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, message, "TODO")
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, e.detail(), e.short_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), short = %self.short_message, message = %self.message, "request failed");
        }
        let body = json!({
            "message": self.message,
            "short_message": self.short_message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn namespace_key(ns: &str) -> ApiResult<NamespaceKey> {
    Ok(NamespaceKey::parse(ns)?)
}

/// Registry for an already-resolved namespace. Kernel routes never trigger
/// resolution: a namespace nobody opened a session in has no kernels.
fn existing_registry(state: &AppState, ns: &str, kernel_id: &KernelId) -> ApiResult<Arc<NamespaceRegistry>> {
    let key = namespace_key(ns)?;
    state
        .directory
        .get(&key)
        .ok_or_else(|| GatewayError::KernelNotFound(kernel_id.to_string()).into())
}

pub async fn kernelspecs(State(state): State<AppState>, Path(ns): Path<String>) -> Json<KernelSpecs> {
    let specs = match NamespaceKey::parse(&ns) {
        Ok(key) => match state.directory.registry(&key).await {
            Ok(_) => KernelSpecs::for_namespace(&key),
            Err(e) => KernelSpecs::unavailable(&e.detail()),
        },
        Err(e) => KernelSpecs::unavailable(&e.detail()),
    };
    Json(specs)
}

pub async fn list_kernels(State(state): State<AppState>, Path(ns): Path<String>) -> ApiResult<Json<Vec<Kernel>>> {
    let key = namespace_key(&ns)?;
    let kernels = state.directory.get(&key).map(|r| r.kernels()).unwrap_or_default();
    Ok(Json(kernels))
}

#[derive(Debug, Deserialize)]
struct StartKernel {
    #[serde(default)]
    name: Option<String>,
}

/// Kernels only come into being through sessions.
pub async fn start_kernel(Path(ns): Path<String>, body: Bytes) -> ApiResult<Response> {
    let key = namespace_key(&ns)?;
    let request: StartKernel = if body.is_empty() {
        StartKernel { name: None }
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("Invalid kernel request: {e}")))?
    };
    let name = request.name.unwrap_or_else(|| "iris-polyglot".to_string());
    Err(ApiError::todo(format!(
        "In '{}' on '{}' start a '{name}' kernel",
        key.namespace(),
        key.server()
    )))
}

pub async fn get_kernel(
    State(state): State<AppState>,
    Path((ns, kernel_id)): Path<(String, KernelId)>,
) -> ApiResult<Json<Kernel>> {
    let registry = existing_registry(&state, &ns, &kernel_id)?;
    registry
        .kernel(&kernel_id)
        .map(Json)
        .ok_or_else(|| GatewayError::KernelNotFound(kernel_id.to_string()).into())
}

pub async fn delete_kernel(
    State(state): State<AppState>,
    Path((ns, kernel_id)): Path<(String, KernelId)>,
) -> ApiResult<StatusCode> {
    let registry = existing_registry(&state, &ns, &kernel_id)?;
    registry.delete_kernel(&kernel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn interrupt_kernel(
    State(state): State<AppState>,
    Path((ns, kernel_id)): Path<(String, KernelId)>,
) -> ApiResult<StatusCode> {
    let registry = existing_registry(&state, &ns, &kernel_id)?;
    registry.interrupt(&kernel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restart_kernel(
    State(state): State<AppState>,
    Path((ns, kernel_id)): Path<(String, KernelId)>,
) -> ApiResult<Json<Kernel>> {
    let registry = existing_registry(&state, &ns, &kernel_id)?;
    Ok(Json(registry.restart_kernel(&kernel_id).await?))
}

pub async fn list_sessions(State(state): State<AppState>, Path(ns): Path<String>) -> ApiResult<Json<Vec<Session>>> {
    let key = namespace_key(&ns)?;
    let sessions = state.directory.get(&key).map(|r| r.sessions()).unwrap_or_default();
    Ok(Json(sessions))
}

pub async fn create_session(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let key = namespace_key(&ns)?;
    let registry = state.directory.registry(&key).await?;
    let request: CreateSession =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("Invalid session request: {e}")))?;
    let session = registry.get_or_create_session(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Always 204, whether or not the session existed.
pub async fn delete_session(
    State(state): State<AppState>,
    Path((ns, session_id)): Path<(String, SessionId)>,
) -> StatusCode {
    if let Some(registry) = NamespaceKey::parse(&ns).ok().and_then(|key| state.directory.get(&key)) {
        if !registry.delete_session(&session_id).await {
            debug!(%session_id, "delete of unknown session");
        }
    }
    StatusCode::NO_CONTENT
}

pub async fn channels(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((ns, kernel_id)): Path<(String, KernelId)>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let key = namespace_key(&ns)?;
    let iopub = state
        .directory
        .get(&key)
        .and_then(|registry| registry.process(&kernel_id))
        .map(|process| process.subscribe());
    if iopub.is_none() {
        warn!(%key, %kernel_id, "channels opened for a kernel with no process");
    }
    let ctx = ChannelContext {
        key,
        kernel_id,
        connection: ConnectionId::new(),
    };
    info!(connection = %ctx.connection, client_session = params.get("session_id").map(String::as_str), "channels upgrade");

    let router = state.router.clone();
    let stats = state.stats.clone();
    let options = state.channel_options;
    Ok(ws.on_upgrade(move |socket| serve_channels(socket, router, ctx, iopub, options, stats)))
}

pub async fn tree() -> Json<Value> {
    Json(json!({}))
}

pub async fn hub_api() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({})))
}

pub async fn hub_login(Path(ns): Path<String>) -> ApiError {
    ApiError::todo(format!("TODO: /{ns}/hub/login"))
}

pub async fn login(Path(ns): Path<String>) -> ApiError {
    ApiError::todo(format!("TODO: /{ns}/login"))
}

pub async fn logout(Path(ns): Path<String>) -> Json<Value> {
    Json(json!({ "info": format!("Successfully logged out of {ns}.") }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "namespaces": state.directory.keys().len(),
        "connections": state.stats.connections(),
        "dropped_frames": state.stats.dropped_frames(),
        "overflowed_frames": state.stats.overflowed_frames(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_errors_map_to_status_and_short_message() {
        let err = ApiError::from(GatewayError::no_kernels("none here"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.short_message, "NOKERNELS");
        assert_eq!(err.message, "none here");

        let err = ApiError::from(GatewayError::TargetUnresolved("Server 'x' not defined.".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Server 'x' not defined.");
    }

    #[test]
    fn todo_is_not_implemented() {
        let err = ApiError::todo("later");
        assert_eq!(err.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.short_message, "TODO");
    }
}
