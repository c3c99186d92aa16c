//! JSON-RPC request handlers.

mod downloads;
mod shared;

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(crate) use shared::{get_bool_param, get_str_param, require_str_param};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (StatusCode::OK, Json(JsonRpcResponse::success(id, json!({"status": "ok"}))));
    }

    let result = dispatch_method(&state, method, &params).await;

    match result {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let code = e.to_rpc_error_code();
            (StatusCode::OK, Json(JsonRpcResponse::error(id, code, e.to_string())))
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the download engine (spec §6's abstract
/// programmatic surface, named identically here).
async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> modeldl_core::Result<Value> {
    match method {
        "download_model" => downloads::download_model(state, params).await,
        "cancel_download" => downloads::cancel_download(state, params).await,
        "download_model_in_background" => downloads::download_model_in_background(state, params).await,
        "background_download_status" => downloads::background_download_status(state, params).await,
        "list_background_downloads" => downloads::list_background_downloads(state, params).await,
        "cancel_background_download" => downloads::cancel_background_download(state, params).await,
        "pause_background_download" => downloads::pause_background_download(state, params).await,
        "resume_background_download" => downloads::resume_background_download(state, params).await,
        "delete_model" => downloads::delete_model(state, params).await,
        "list_downloaded_models" => downloads::list_downloaded_models(state, params).await,
        "model_exists" => downloads::model_exists(state, params).await,
        "get_model_location" => downloads::get_model_location(state, params).await,
        "get_model_files" => downloads::get_model_files(state, params).await,
        "get_model_file_url" => downloads::get_model_file_url(state, params).await,
        "available_disk_space" => downloads::available_disk_space(state, params).await,
        "get_model_size" => downloads::get_model_size(state, params).await,
        "validate_model" => downloads::validate_model(state, params).await,
        "cleanup_incomplete_downloads" => downloads::cleanup_incomplete_downloads(state, params).await,

        _ => {
            warn!("Method not found: {}", method);
            Err(modeldl_core::DownloadError::Other(format!("Method not found: {}", method)))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"data": "test"}));
        assert!(response.error.is_none());
        assert!(response.result.is_some());
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32600, "Test error".into());
        assert!(response.error.is_some());
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32600);
    }
}
