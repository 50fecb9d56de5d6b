// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Wall-clock access in the engine's native unit, epoch milliseconds.
//!
//! Tests can pin the clock to a fixed value so TTL behavior is
//! deterministic.

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    #[cfg(test)]
    {
        let pinned = PINNED_MILLIS.load(std::sync::atomic::Ordering::Relaxed);
        if pinned != UNPINNED {
            return pinned;
        }
    }

    #[expect(clippy::expect_used, reason = "pre-epoch clocks are unsupported")]
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .expect("time went backwards");

    #[allow(clippy::cast_possible_truncation)]
    {
        elapsed.as_millis() as u64
    }
}

#[cfg(test)]
const UNPINNED: u64 = u64::MAX;

#[cfg(test)]
static PINNED_MILLIS: std::sync::atomic::AtomicU64 =
    std::sync::atomic::AtomicU64::new(UNPINNED);

#[cfg(test)]
pub(crate) fn pin_millis_for_test(value: Option<u64>) {
    PINNED_MILLIS.store(
        value.unwrap_or(UNPINNED),
        std::sync::atomic::Ordering::Relaxed,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn pinned_clock() {
        pin_millis_for_test(Some(1_234));
        assert_eq!(1_234, unix_millis());
        pin_millis_for_test(None);
        assert!(unix_millis() > 1_234);
    }
}
