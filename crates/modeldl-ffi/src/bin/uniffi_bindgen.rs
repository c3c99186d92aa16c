/// Custom uniffi-bindgen binary for generating language bindings.
///
/// This binary uses the UniFFI bindgen API to generate Python/Kotlin/Swift
/// bindings from the compiled modeldl-ffi cdylib.
///
/// Usage:
///   cargo run -p modeldl-ffi --bin modeldl-uniffi-bindgen -- \
///     generate --library -l python -o bindings/python \
///     target/release/libmodeldl_ffi.so
fn main() {
    uniffi::uniffi_bindgen_main();
}
