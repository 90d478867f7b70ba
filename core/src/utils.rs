//! Shared helpers.

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since UNIX epoch.
#[inline]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique id from the current time in nanoseconds plus a process-wide
/// sequence number, so two ids minted in the same tick still differ.
#[inline]
pub fn gen_id() -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", nanos, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_gen_id_unique_in_tight_loop() {
        let ids: HashSet<String> = (0..1000).map(|_| gen_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
