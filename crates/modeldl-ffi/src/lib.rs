//! UniFFI bindings for `modeldl-core`.
//!
//! This crate provides cross-language bindings for the model download
//! engine, enabling native access from Python, C#, Swift, Kotlin, Go, and
//! Ruby.
//!
//! # Supported Languages
//!
//! - **Python** - Official UniFFI support
//! - **C#** - Via uniffi-bindgen-cs
//! - **Kotlin** - Official UniFFI support
//! - **Swift** - Official UniFFI support
//! - **Ruby** - Official UniFFI support
//! - **Go** - Via uniffi-bindgen-go
//!
//! # Usage
//!
//! Generate bindings using `--library` mode:
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p modeldl-ffi --release
//!
//! # Generate Python bindings
//! modeldl-uniffi-bindgen generate --library --language python \
//!     --out-dir ./bindings/python target/release/libmodeldl_ffi.so
//!
//! # Generate C# bindings
//! uniffi-bindgen-cs --library --config crates/modeldl-ffi/uniffi.toml \
//!     --out-dir ./bindings/csharp target/release/libmodeldl_ffi.so
//! ```

mod bindings;

pub use bindings::*;
