//! Atomic file operations for safe JSON persistence.
//!
//! Implements atomic writes using:
//! 1. Write to temp file with unique PID+TID suffix
//! 2. fsync to ensure data reaches disk
//! 3. Atomic rename to target path
//! 4. Optional backup creation

use crate::{DownloadError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::process;
use std::thread;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path).map_err(|e| DownloadError::io_with_path(e, path.to_path_buf()))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| DownloadError::io_with_path(e, path.to_path_buf()))?;

    let data: T = serde_json::from_str(&contents)?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically.
///
/// This function:
/// 1. Serializes data to a temp file with PID+TID suffix
/// 2. Validates the JSON by re-parsing
/// 3. Calls fsync to ensure data reaches disk
/// 4. Optionally creates a .bak backup
/// 5. Atomically renames temp file to target
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| DownloadError::io_with_path(e, parent.to_path_buf()))?;
        }
    }

    let pid = process::id();
    let tid = thread_id();
    let temp_path = path.with_extension(format!("json.{}.{}.tmp", pid, tid));

    let serialized = serde_json::to_string_pretty(data)?;
    serde_json::from_str::<serde_json::Value>(&serialized)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| DownloadError::io_with_path(e, temp_path.clone()))?;

        file.write_all(serialized.as_bytes())
            .map_err(|e| DownloadError::io_with_path(e, temp_path.clone()))?;

        file.flush().map_err(|e| DownloadError::io_with_path(e, temp_path.clone()))?;

        #[cfg(unix)]
        {
            unsafe {
                libc::fsync(file.as_raw_fd());
            }
        }

        #[cfg(not(unix))]
        {
            file.sync_all().map_err(|e| DownloadError::io_with_path(e, temp_path.clone()))?;
        }
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("failed to create backup {}: {}", backup_path.display(), e);
        } else {
            debug!("created backup: {}", backup_path.display());
        }
    }

    fs::rename(&temp_path, path).map_err(|e| DownloadError::io_with_path(e, path.to_path_buf()))?;

    debug!("atomically wrote {}", path.display());
    Ok(())
}

/// Get a unique thread identifier.
fn thread_id() -> u64 {
    let id = thread::current().id();
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", id).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &data, false).unwrap();
        assert!(path.exists());

        let read_data: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read_data, Some(data));
    }

    #[test]
    fn test_atomic_write_creates_backup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        let data1 = TestData {
            name: "first".to_string(),
            value: 1,
        };
        let data2 = TestData {
            name: "second".to_string(),
            value: 2,
        };

        atomic_write_json(&path, &data1, true).unwrap();
        atomic_write_json(&path, &data2, true).unwrap();

        let backup_path = path.with_extension("json.bak");
        assert!(backup_path.exists());

        let backup_data: Option<TestData> = atomic_read_json(&backup_path).unwrap();
        assert_eq!(backup_data, Some(data1));

        let current_data: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(current_data, Some(data2));
    }

    #[test]
    fn test_atomic_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let result: Option<TestData> = atomic_read_json(&path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_atomic_write_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.json");

        let data = TestData {
            name: "nested".to_string(),
            value: 99,
        };

        atomic_write_json(&path, &data, false).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_atomic_read_corrupted_json_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let result: Result<Option<TestData>> = atomic_read_json(&path);
        assert!(result.is_err());
    }
}
