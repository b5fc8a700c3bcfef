//! Process-wide id generation for subscription, transaction and receipt ids.

use std::sync::atomic::{AtomicU64, Ordering};

static SERIAL: AtomicU64 = AtomicU64::new(1);

/// Next value of the monotonically increasing serial counter.
pub fn next_serial() -> u64 {
    SERIAL.fetch_add(1, Ordering::SeqCst)
}

/// Next serial formatted as `<prefix>-<n>`.
pub fn next_id(prefix: &str) -> String {
    format!("{}-{}", prefix, next_serial())
}
