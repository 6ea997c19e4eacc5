//! Property-Based Tests for the Rate Limiter
//!
//! # Test Strategies
//!
//! - **Quota**: with time frozen, exactly `max_requests` checks are admitted
//! - **Free rejections**: hammering a full limiter never delays recovery
//! - **Read-only queries**: `remaining` never changes what `check` decides

use proptest::prelude::*;
use std::sync::Arc;

use super::{RateLimitConfig, RateLimiter};
use crate::clock::ManualClock;
use crate::storage::MemoryStore;

fn limiter(max_requests: u32, window_ms: u64) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let limiter = RateLimiter::new(
        Arc::new(MemoryStore::new()),
        RateLimitConfig::new(max_requests, window_ms, "prop"),
    )
    .with_clock(Arc::new(clock.clone()));
    (limiter, clock)
}

proptest! {
    /// N checks at one instant admit exactly N and reject the next
    #[test]
    fn prop_quota_respected_within_window(
        max_requests in 1u32..50,
        window_ms in 1u64..600_000
    ) {
        let (limiter, _clock) = limiter(max_requests, window_ms);

        for _ in 0..max_requests {
            prop_assert!(limiter.check("action"));
        }
        prop_assert!(!limiter.check("action"));
        prop_assert_eq!(limiter.remaining("action"), 0);
    }

    /// Rejected checks inside the window do not push back recovery
    #[test]
    fn prop_rejected_attempts_are_free(
        max_requests in 1u32..10,
        window_ms in 2u64..10_000,
        rejections in prop::collection::vec(0u64..1_000, 1..20)
    ) {
        let (limiter, clock) = limiter(max_requests, window_ms);
        let start = 1_700_000_000_000i64;

        for _ in 0..max_requests {
            prop_assert!(limiter.check("action"));
        }

        for offset in rejections {
            let offset = (offset % (window_ms - 1)) as i64;
            clock.set(start + offset);
            prop_assert!(!limiter.check("action"));
        }

        clock.set(start + window_ms as i64);
        prop_assert!(limiter.check("action"));
    }

    /// `remaining` is stable and does not consume quota
    #[test]
    fn prop_remaining_is_non_mutating(
        max_requests in 1u32..20,
        admitted in 0u32..20,
        queries in 1usize..10
    ) {
        let (limiter, _clock) = limiter(max_requests, 60_000);
        let admitted = admitted.min(max_requests);

        for _ in 0..admitted {
            limiter.check("action");
        }

        let expected = max_requests - admitted;
        for _ in 0..queries {
            prop_assert_eq!(limiter.remaining("action"), expected);
        }

        prop_assert_eq!(limiter.check("action"), expected > 0);
    }
}
