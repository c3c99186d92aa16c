//! modeldl-rpc - JSON-RPC server exposing `modeldl-core` over a local HTTP
//! socket, for consumption by a host process over IPC.

mod handlers;
mod server;

use anyhow::Result;
use clap::Parser;
use modeldl_core::network::build_client;
use modeldl_core::resolver::HfFileListResolver;
use modeldl_core::{EngineConfig, ModelDownloadEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "modeldl-rpc")]
#[command(about = "JSON-RPC server for the model download engine")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Directory for downloaded models, staging, and durable download state
    /// (defaults to the platform data directory)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting modeldl-rpc server");

    let data_dir = args
        .data_dir
        .or_else(|| dirs::data_dir().map(|d| d.join("modeldl")))
        .unwrap_or_else(|| PathBuf::from("."));
    info!("Data directory: {}", data_dir.display());

    let resolver = Arc::new(HfFileListResolver::new(build_client()?));
    let engine = ModelDownloadEngine::new(EngineConfig::new(&data_dir, resolver)).await?;

    let addr = server::start_server(engine, &args.host, args.port).await?;

    // Intentional stdout write: the host process parses this line to learn
    // which port was bound (relevant when `port == 0`).
    println!("RPC_PORT={}", addr.port());
    info!("RPC server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
