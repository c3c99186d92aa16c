//! Progress Aggregator: merges per-file byte counters into a single
//! throttled `DownloadProgress` stream (spec §4.6).

use crate::config::NetworkConfig;
use crate::models::DownloadProgress;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks per-file byte counters for one download and derives the merged
/// `DownloadProgress`, throttling emission to at most one update per
/// [`NetworkConfig::PROGRESS_EVENT_INTERVAL`].
pub struct ProgressAggregator {
    total_bytes: u64,
    total_files: usize,
    expected_sizes: HashMap<String, u64>,
    received: HashMap<String, u64>,
    /// Insertion order of files, used to break ties when picking
    /// `current_file_name` among files that advanced in the same tick.
    order: Vec<String>,
    completed: std::collections::HashSet<String>,
    last_emitted: Option<Instant>,
    last_advancing_file: Option<String>,
}

impl ProgressAggregator {
    pub fn new(expected_sizes: HashMap<String, u64>) -> Self {
        let total_bytes = expected_sizes.values().sum();
        let total_files = expected_sizes.len();
        Self {
            total_bytes,
            total_files,
            expected_sizes,
            received: HashMap::new(),
            order: Vec::new(),
            completed: std::collections::HashSet::new(),
            last_emitted: None,
            last_advancing_file: None,
        }
    }

    /// Record a progress tick for `relative_path`. `flushed` indicates the
    /// staging file has been durably written at `bytes_received`, required
    /// before the file counts toward `files_completed` (spec §4.6 invariant).
    ///
    /// Returns `Some(progress)` if this tick should be emitted under the
    /// throttle, `None` if it was absorbed.
    pub fn record(
        &mut self,
        relative_path: &str,
        bytes_received: u64,
        flushed: bool,
    ) -> Option<DownloadProgress> {
        if !self.order.iter().any(|p| p == relative_path) {
            self.order.push(relative_path.to_string());
        }
        self.received.insert(relative_path.to_string(), bytes_received);
        self.last_advancing_file = Some(relative_path.to_string());

        let expected = self.expected_sizes.get(relative_path).copied();
        if flushed && expected == Some(bytes_received) {
            self.completed.insert(relative_path.to_string());
        }

        self.maybe_emit(false)
    }

    /// Force emission regardless of throttle (e.g. on the final `1.0` tick).
    pub fn force_emit(&mut self) -> DownloadProgress {
        self.maybe_emit(true).unwrap_or_else(|| self.snapshot())
    }

    fn maybe_emit(&mut self, force: bool) -> Option<DownloadProgress> {
        let now_elapsed_enough = match self.last_emitted {
            None => true,
            Some(last) => Instant::now().duration_since(last) >= NetworkConfig::PROGRESS_EVENT_INTERVAL,
        };
        if !force && !now_elapsed_enough {
            return None;
        }
        self.last_emitted = Some(Instant::now());
        Some(self.snapshot())
    }

    fn snapshot(&self) -> DownloadProgress {
        DownloadProgress {
            bytes_downloaded: self.received.values().sum(),
            total_bytes: self.total_bytes,
            files_completed: self.completed.len(),
            total_files: self.total_files,
            current_file_name: self.current_file_name().map(str::to_string),
        }
    }

    /// The `relativePath` of the most recently advancing file, ties broken
    /// by insertion order (spec §4.6).
    pub fn current_file_name(&self) -> Option<&str> {
        self.last_advancing_file.as_deref().or_else(|| self.order.first().map(String::as_str))
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.total_files && self.total_files > 0
    }
}

/// Minimum interval between throttled emissions, kept separate from the
/// config constant so tests can assert the wiring independent of the value.
pub const THROTTLE_INTERVAL: Duration = NetworkConfig::PROGRESS_EVENT_INTERVAL;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn sizes() -> HashMap<String, u64> {
        HashMap::from([("a.bin".to_string(), 100), ("b.bin".to_string(), 50)])
    }

    #[test]
    fn throttles_rapid_updates() {
        let mut agg = ProgressAggregator::new(sizes());
        assert!(agg.record("a.bin", 10, false).is_some(), "first tick always emits");
        assert!(agg.record("a.bin", 20, false).is_none(), "immediate second tick is absorbed");
    }

    #[test]
    fn emits_after_throttle_interval_elapses() {
        let mut agg = ProgressAggregator::new(sizes());
        agg.record("a.bin", 10, false);
        sleep(THROTTLE_INTERVAL + Duration::from_millis(10));
        assert!(agg.record("a.bin", 20, false).is_some());
    }

    #[test]
    fn files_completed_requires_flush_and_full_size() {
        let mut agg = ProgressAggregator::new(sizes());
        agg.record("a.bin", 100, false);
        assert_eq!(agg.force_emit().files_completed, 0, "not flushed yet");

        agg.record("a.bin", 100, true);
        assert_eq!(agg.force_emit().files_completed, 1);
    }

    #[test]
    fn is_complete_requires_all_files() {
        let mut agg = ProgressAggregator::new(sizes());
        agg.record("a.bin", 100, true);
        assert!(!agg.is_complete());
        agg.record("b.bin", 50, true);
        assert!(agg.is_complete());
    }
}
