// ============================================
// File: crates/shroud-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! Wall-clock seconds for the `connected_at`, `last_send` and `last_recv`
//! fields of peer reports.
//!
//! Nothing in the transport engine is driven by wall-clock time; rekeying
//! is packet-count driven.

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in seconds (0 if the clock is before 1970).
#[must_use]
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_timestamp_is_recent() {
        // 2020-01-01
        assert!(unix_timestamp() > 1_577_836_800);
    }

    #[test]
    fn test_unix_timestamp_is_monotonic_enough() {
        let first = unix_timestamp();
        assert!(unix_timestamp() >= first);
    }
}
