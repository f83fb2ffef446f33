//! Build-time metadata.

/// Crate version, as reported by `--version` and `GET /version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
