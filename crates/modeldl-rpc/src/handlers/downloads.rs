//! Model download handlers: the JSON-RPC surface over [`ModelDownloadEngine`].

use crate::handlers::{get_bool_param, get_str_param, require_str_param};
use crate::server::AppState;
use modeldl_core::{Backend, DownloadEvent, DownloadOptions, Priority, RepositoryId};
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_backend(raw: &str) -> modeldl_core::Result<Backend> {
    match raw {
        "mlx" => Ok(Backend::Mlx),
        "gguf" => Ok(Backend::Gguf),
        "coreml" => Ok(Backend::Coreml),
        "remote" => Ok(Backend::Remote),
        other => Err(modeldl_core::DownloadError::Other(format!("unknown backend: {other}"))),
    }
}

fn parse_headers(params: &Value) -> Vec<(String, String)> {
    params
        .get("headers")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_options(params: &Value) -> DownloadOptions {
    let mut options = DownloadOptions::default();
    if let Some(priority) = get_str_param(params, "priority", "priority") {
        options.priority = match priority {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Normal,
        };
    }
    if let Some(cellular) = get_bool_param(params, "enable_cellular", "enableCellular") {
        options.enable_cellular = cellular;
    }
    if let Some(discretionary) = get_bool_param(params, "is_discretionary", "isDiscretionary") {
        options.is_discretionary = discretionary;
    }
    if let Some(title) = get_str_param(params, "notification_title", "notificationTitle") {
        options.notification_title = Some(title.to_string());
    }
    options
}

fn parse_repo_id(params: &Value) -> modeldl_core::Result<RepositoryId> {
    let raw = require_str_param(params, "repo_id", "repoId")?;
    RepositoryId::parse(&raw)
}

fn parse_download_id(params: &Value) -> modeldl_core::Result<Uuid> {
    let raw = require_str_param(params, "download_id", "downloadId")?;
    Uuid::parse_str(&raw).map_err(|e| modeldl_core::DownloadError::Other(format!("invalid download id: {e}")))
}

/// Blocking foreground download: drains the coordinator's event stream to
/// completion and returns the finalized `ModelInfo`, or propagates the first
/// error encountered.
pub async fn download_model(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    let backend = parse_backend(&require_str_param(params, "backend", "backend")?)?;
    let headers = parse_headers(params);
    let options = parse_options(params);

    let mut rx = state.engine.download_model(repo_id, backend, headers, options).await?;

    while let Some(event) = rx.recv().await {
        match event? {
            DownloadEvent::Completed(info) => return Ok(serde_json::to_value(info)?),
            DownloadEvent::Progress(_) => continue,
        }
    }

    Err(modeldl_core::DownloadError::Other(
        "download stream closed before completion".to_string(),
    ))
}

pub async fn cancel_download(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    let cancelled = state.engine.cancel_download(&repo_id).await;
    Ok(json!({ "cancelled": cancelled }))
}

pub async fn download_model_in_background(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    let backend = parse_backend(&require_str_param(params, "backend", "backend")?)?;
    let headers = parse_headers(params);
    let options = parse_options(params);

    let mut rx = state
        .engine
        .download_model_in_background(repo_id, backend, headers, options)
        .await?;

    match rx.recv().await {
        Some(modeldl_core::BackgroundDownloadEvent::Handle(handle)) => Ok(serde_json::to_value(handle)?),
        _ => Err(modeldl_core::DownloadError::Other(
            "background download did not report a handle".to_string(),
        )),
    }
}

pub async fn background_download_status(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let id = parse_download_id(params)?;
    match state.engine.background_download_status(id).await {
        Some(status) => Ok(serde_json::to_value(status)?),
        None => Ok(Value::Null),
    }
}

pub async fn list_background_downloads(state: &AppState, _params: &Value) -> modeldl_core::Result<Value> {
    let downloads = state.engine.list_background_downloads().await;
    Ok(serde_json::to_value(downloads)?)
}

pub async fn cancel_background_download(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let id = parse_download_id(params)?;
    state.engine.cancel_background_download(id).await?;
    Ok(json!({ "cancelled": true }))
}

pub async fn pause_background_download(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let id = parse_download_id(params)?;
    state.engine.pause_background_download(id).await?;
    Ok(json!({ "paused": true }))
}

pub async fn resume_background_download(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let id = parse_download_id(params)?;
    state.engine.resume_background_download(id).await?;
    Ok(json!({ "resumed": true }))
}

pub async fn delete_model(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    state.engine.delete_model(&repo_id)?;
    Ok(json!({ "deleted": true }))
}

pub async fn list_downloaded_models(state: &AppState, _params: &Value) -> modeldl_core::Result<Value> {
    let models = state.engine.list_downloaded_models()?;
    Ok(serde_json::to_value(models)?)
}

pub async fn model_exists(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    Ok(json!(state.engine.model_exists(&repo_id)))
}

pub async fn get_model_location(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    match state.engine.get_model_location(&repo_id) {
        Some(path) => Ok(json!(path.display().to_string())),
        None => Ok(Value::Null),
    }
}

pub async fn get_model_files(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    let files: Vec<String> = state
        .engine
        .get_model_files(&repo_id)
        .into_iter()
        .map(|p| p.display().to_string())
        .collect();
    Ok(json!(files))
}

/// Not an engine operation: a convenience RPC-layer helper that resolves one
/// of a model's files to a `file://` URL a renderer process can load
/// directly, given the model is already finalized on disk.
pub async fn get_model_file_url(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    let relative_path = require_str_param(params, "relative_path", "relativePath")?;
    let Some(location) = state.engine.get_model_location(&repo_id) else {
        return Ok(Value::Null);
    };
    let file_path = location.join(&relative_path);
    if !file_path.exists() {
        return Ok(Value::Null);
    }
    Ok(json!(url::Url::from_file_path(&file_path)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("file://{}", file_path.display()))))
}

pub async fn available_disk_space(state: &AppState, _params: &Value) -> modeldl_core::Result<Value> {
    Ok(json!(state.engine.available_disk_space()?))
}

pub async fn get_model_size(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    Ok(json!(state.engine.get_model_size(&repo_id)))
}

pub async fn validate_model(state: &AppState, params: &Value) -> modeldl_core::Result<Value> {
    let repo_id = parse_repo_id(params)?;
    Ok(serde_json::to_value(state.engine.validate_model(&repo_id)?)?)
}

pub async fn cleanup_incomplete_downloads(state: &AppState, _params: &Value) -> modeldl_core::Result<Value> {
    let removed = state.engine.cleanup_incomplete_downloads().await?;
    Ok(json!({ "removed": removed }))
}
