//! HTTP server implementation using Axum.

use crate::handlers::{handle_health, handle_rpc};
use axum::{
    routing::{get, post},
    Router,
};
use modeldl_core::ModelDownloadEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Application state shared across handlers.
pub struct AppState {
    /// The headless download engine this server wraps.
    pub engine: ModelDownloadEngine,
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when `port == 0`).
pub async fn start_server(engine: ModelDownloadEngine, host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(AppState { engine });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server error");
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modeldl_core::{EngineConfig, RepositoryId};
    use std::sync::Arc as StdArc;
    use tempfile::TempDir;

    struct EmptyResolver;

    #[async_trait::async_trait]
    impl modeldl_core::resolver::FileListResolver for EmptyResolver {
        async fn list_files(
            &self,
            _repo_id: &RepositoryId,
            _backend: modeldl_core::Backend,
        ) -> modeldl_core::Result<Vec<modeldl_core::RemoteFile>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_server_starts() {
        let temp_dir = TempDir::new().unwrap();
        let engine = ModelDownloadEngine::new(EngineConfig::new(temp_dir.path(), StdArc::new(EmptyResolver)))
            .await
            .unwrap();

        let addr = start_server(engine, "127.0.0.1", 0).await.unwrap();
        assert!(addr.port() > 0);
    }
}
