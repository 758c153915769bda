//! Tracing/logging setup shared by every binary and test harness.

/// Initialize process-wide tracing with `config`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(config: &LogConfig) {
    tracing::init(config);
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogConfig, LogFormat};
