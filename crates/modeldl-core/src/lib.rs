//! `modeldl-core`: headless engine for fetching, resuming, and laying out
//! machine-learning model repositories on disk.
//!
//! The crate is organized as one module per collaborator named in the
//! design: identity derivation, on-disk layout, the streaming fetcher,
//! archive extraction, file-list resolution, progress aggregation, the
//! foreground coordinator and background download manager, durable state,
//! and the background session driver. [`engine::ModelDownloadEngine`] wires
//! all of them together behind the single entry point a host constructs.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod download_manager;
pub mod driver;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod layout;
pub mod metadata;
pub mod models;
pub mod network;
pub mod notifications;
pub mod progress;
pub mod resolver;
pub mod state_store;
pub mod task_manager;

pub use error::{DownloadError, Result};
pub use models::{
    Backend, BackgroundDownloadEvent, BackgroundDownloadHandle, BackgroundDownloadStatus, DownloadEvent,
    DownloadOptions, DownloadProgress, DownloadState, DownloadStatus, ModelInfo, PersistedDownload, Priority,
    RemoteFile, RepositoryId, ValidationResult,
};

pub use engine::{EngineConfig, ModelDownloadEngine};
