//! Node Service: the HTTP surface. Decodes a request into a node path and
//! a JSON body, authenticates it, dispatches to the storage adapter by
//! verb and query parameter, and serializes the result.
//!
//! Cancellation: this handler does no bespoke disconnect-detection. Axum
//! (via hyper) stops polling a handler's future the moment the client
//! disconnects, which drops every in-flight `.await` in this call chain
//! — including the storage future — without ever reaching the point
//! that would write a response. That is the direct, idiomatic-Rust
//! counterpart of the original's `request.notifyFinish().addErrback(...,
//! d.cancel())`: there, cancellation had to be wired by hand because the
//! original's deferred chains outlive the request; here the request
//! future *is* the cancellation scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{self, AdminCredentials, Principal};
use crate::error::{AppError, AppResult};
use crate::path::{self, NodePath};
use crate::storage::{NodeValue, StorageAdapter};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageAdapter>,
    pub admin: AdminCredentials,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/node/{*rest}", any(node_handler))
        .with_state(state)
}

fn error_envelope(err: &AppError) -> Value {
    json!({
        "error": err.short(),
        "message": err.to_string(),
        "instance": err.instance_tag(),
    })
}

fn error_response(err: AppError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_envelope(&err))).into_response()
}

/// Rejects non-object bodies and non-string map values up front, per
/// §4.D step 2 and the `DataTypeError`/`InvalidInput` taxonomy.
fn body_to_node_value(body: &[u8]) -> AppResult<NodeValue> {
    if body.is_empty() {
        return Ok(NodeValue::new());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidInput(format!("body is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("body must be a JSON object".into()))?;

    let mut out = NodeValue::new();
    for (k, v) in obj {
        match v {
            Value::String(s) => {
                out.insert(k.clone(), s.clone());
            }
            _ => return Err(AppError::DataTypeError(format!("value for key `{k}` is not a string"))),
        }
    }
    Ok(out)
}

/// Extracts just the key set from a DELETE body. Unlike `body_to_node_value`,
/// the values are never inspected — `postgres.py::_deleteNode` dispatches on
/// `content.keys()` regardless of what the values are, so `DELETE {"k":1}`
/// deletes key `k` rather than failing with `DataTypeError`.
fn body_to_key_set(body: &[u8]) -> AppResult<Vec<String>> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidInput(format!("body is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AppError::InvalidInput("body must be a JSON object".into()))?;
    Ok(obj.keys().cloned().collect())
}

fn extract_principal(headers: &HeaderMap) -> AppResult<Option<Principal>> {
    match headers.get(axum::http::header::AUTHORIZATION) {
        None => Ok(None),
        Some(value) => {
            let s = value
                .to_str()
                .map_err(|_| AppError::AuthFailure("authorization header is not ASCII".into()))?;
            Ok(Some(Principal::from_basic_auth(s)?))
        }
    }
}

/// Any non-empty query value is truthy, matching the original's raw
/// string check — `cascade=false` and `cascade=0` both enable cascade.
fn is_truthy_param(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|v| !v.is_empty())
}

async fn node_handler(
    State(state): State<AppState>,
    AxumPath(rest): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
    method: Method,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let start = Instant::now();
    let (raw_path, _format) = path::split_format_suffix(&rest);

    let result = handle(&state, &method, raw_path, &params, &headers, &body).await;

    let elapsed = start.elapsed();
    match result {
        Ok(response) => {
            info!(method = %method, path = %raw_path, elapsed_ms = elapsed.as_millis() as u64, "request completed");
            response
        }
        Err(err) => {
            warn!(method = %method, path = %raw_path, elapsed_ms = elapsed.as_millis() as u64, kind = err.instance_tag(), "request failed");
            error_response(err)
        }
    }
}

async fn handle(
    state: &AppState,
    method: &Method,
    raw_path: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> AppResult<Response> {
    let principal = extract_principal(headers)?;

    // `children` is the one query that may legitimately target a bare
    // namespace (one segment); every other dispatch requires a full
    // two-or-more segment node path.
    if method == Method::GET && params.get("method").map(String::as_str) == Some("children") {
        if let Ok(namespace) = single_segment(raw_path) {
            let target = NodePath { namespace: namespace.clone(), collection: String::new(), label: String::new() };
            auth::authorize(&state.admin, state.storage.as_ref(), principal.as_ref(), &target).await?;
            let collections = state.storage.get_collections(&namespace).await?;
            return Ok(Json(collections).into_response());
        }
    }

    let node_path = path::parse(raw_path)?;
    auth::authorize(&state.admin, state.storage.as_ref(), principal.as_ref(), &node_path).await?;

    match *method {
        Method::GET => handle_get(state, &node_path, params).await,
        Method::PUT => {
            let value = body_to_node_value(body)?;
            let affected = state.storage.create_node(&node_path, value).await?;
            Ok(mutation_response(affected, "created"))
        }
        Method::POST => {
            let value = body_to_node_value(body)?;
            let affected = state.storage.update_node(&node_path, value).await?;
            Ok(mutation_response(affected, "modified"))
        }
        Method::DELETE => {
            let key_set = body_to_key_set(body)?;
            let cascade = is_truthy_param(params, "cascade");
            let keys = if key_set.is_empty() { None } else { Some(key_set) };
            let affected = state.storage.delete_node(&node_path, keys, cascade).await?;
            Ok(mutation_response(affected, "modified"))
        }
        _ => Err(AppError::InvalidInput(format!("unsupported method `{method}`"))),
    }
}

async fn handle_get(state: &AppState, node_path: &NodePath, params: &HashMap<String, String>) -> AppResult<Response> {
    if let Some(pattern) = params.get("q") {
        let labels = state.storage.search_node(node_path, pattern).await?;
        return Ok(Json(labels).into_response());
    }

    match params.get("method").map(String::as_str) {
        Some("override") => Ok(Json(state.storage.get_overridden(node_path).await?).into_response()),
        Some("combo") => Ok(Json(state.storage.get_combo(node_path).await?).into_response()),
        Some("ancestors") => Ok(Json(state.storage.get_ancestors(node_path).await?).into_response()),
        Some("children") => Ok(Json(state.storage.get_children(node_path).await?).into_response()),
        Some("descendants") => Ok(Json(state.storage.get_descendants(node_path).await?).into_response()),
        // Two-segment GETs without `method` select the collection root,
        // matching the original's fallthrough to `selectNode`.
        None => Ok(Json(state.storage.select_node(node_path).await?).into_response()),
        Some(other) => Err(AppError::PathError(format!("unsupported method parameter `{other}`"))),
    }
}

fn mutation_response(affected: u64, verb: &str) -> Response {
    Json(json!({
        "success": format!("{affected} node(s) has been {verb}"),
        "affected": affected,
    }))
    .into_response()
}

fn single_segment(raw: &str) -> AppResult<String> {
    let normalized = raw.replace('/', ".");
    let trimmed = normalized.trim_start_matches('.');
    if trimmed.is_empty() || trimmed.contains('.') {
        return Err(AppError::PathError("not a bare namespace".into()));
    }
    Ok(trimmed.to_string())
}
