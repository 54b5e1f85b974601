// bgfetch-mobile: native bindings for the host application
// This crate exports the background fetch core API via UniFFI

pub use bgfetch_core::*;
