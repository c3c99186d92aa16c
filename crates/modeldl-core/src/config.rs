//! Centralized configuration for the download engine.
//!
//! Configuration is a bag of `pub const` associated constants grouped by
//! concern rather than a parsed config file — the engine has no environment
//! or on-disk config surface of its own; hosts that need one layer it on top.

use std::time::Duration;

/// Network timeouts, retry bounds, and transfer chunking.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Connect timeout for a single HTTP request (spec §5: default 30s).
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Inactivity timeout: fail a transfer if no bytes arrive within this window.
    pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);
    /// Bounded retries for a single file transfer (spec §7).
    pub const DOWNLOAD_MAX_RETRIES: u32 = 5;
    pub const DOWNLOAD_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const DOWNLOAD_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
    /// Read buffer size for streaming a response body to disk.
    pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;
    /// Suffix used for partially-written staging files (enables `Range` resume).
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    /// Throttle for persisted progress writes (spec §4.11: ≤1 write/s/download).
    pub const PROGRESS_PERSIST_INTERVAL: Duration = Duration::from_secs(1);
    /// Throttle for aggregated progress events delivered to subscribers (spec §4.6).
    pub const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_millis(100);
}

/// On-disk layout conventions. `models_root` and `temp_root` are supplied by
/// the host at construction time (see [`crate::layout::FileLayout::new`]);
/// these constants cover the fixed substructure beneath them.
pub struct PathsConfig;

impl PathsConfig {
    pub const MODEL_INFO_FILENAME: &'static str = "model_info.json";
    /// Grace period before an orphaned staging directory is eligible for
    /// cleanup by `cleanupIncompleteDownloads` (spec §4.2).
    pub const STAGING_GRACE_PERIOD: Duration = Duration::from_secs(48 * 3600);
}

/// Constants describing the background session driver and manager.
pub struct BackendConfig;

impl BackendConfig {
    /// The single well-known key spec §6 persists the `PersistedDownload`
    /// array under. On this host that key is realized as a JSON file name
    /// (see `StateStore::new`) rather than a preferences-store entry.
    pub const PERSISTED_STATE_KEY: &'static str = "ModelDownloader.BackgroundDownloads.v1";
    /// Default number of files a single download may transfer concurrently.
    pub const DEFAULT_FILE_CONCURRENCY: usize = 3;
    pub const HIGH_PRIORITY_FILE_CONCURRENCY: usize = 6;
    pub const LOW_PRIORITY_FILE_CONCURRENCY: usize = 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_reasonable() {
        assert!(NetworkConfig::CONNECT_TIMEOUT > Duration::ZERO);
        assert!(NetworkConfig::INACTIVITY_TIMEOUT > NetworkConfig::CONNECT_TIMEOUT);
    }

    #[test]
    fn retry_bounds_ordered() {
        assert!(NetworkConfig::DOWNLOAD_RETRY_MAX_DELAY >= NetworkConfig::DOWNLOAD_RETRY_BASE_DELAY);
    }
}
