// Binding generator for the native hosts.
//
//   cargo run -p bgfetch-core --features gen-bindings --bin uniffi-bindgen -- \
//       generate --library target/release/libbgfetch_mobile.so --language kotlin --out-dir out
#[cfg(feature = "gen-bindings")]
fn main() {
    uniffi::uniffi_bindgen_main()
}

#[cfg(not(feature = "gen-bindings"))]
fn main() {}
