//! Identifier generation.
//!
//! Ids are a monotonic counter plus a v4 UUID suffix — never wall-clock
//! time, so generation stays stable under clock skew or mocked time in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique id of the form `{prefix}-{counter}-{uuid}`.
pub fn generate_id(prefix: &str) -> String {
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{seq:x}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = generate_id("hook");
        let b = generate_id("hook");
        assert_ne!(a, b);
        assert!(a.starts_with("hook-"));
        assert!(b.starts_with("hook-"));
    }
}
