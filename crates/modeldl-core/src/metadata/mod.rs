//! Metadata persistence: atomic JSON file operations used for the
//! `model_info.json` sidecar and the download state store.

mod atomic;

pub use atomic::{atomic_read_json, atomic_write_json};
