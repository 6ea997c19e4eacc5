//! Sliding-Window Rate Limiter
//!
//! Admits at most `max_requests` attempts per rolling window for each action
//! key. History is a JSON array of millisecond timestamps kept in a
//! [`KeyValueStore`]; only admitted attempts are recorded.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::config::RateLimitConfig;
use crate::clock::{self, Clock};
use crate::metrics;
use crate::storage::KeyValueStore;

/// Serialises `check` across every limiter holding a clone
///
/// `check` is a get followed by a set on the store. Two interleaved callers
/// can both read the same history and both admit. Limiters that share an
/// arbiter take its lock around the whole read-modify-write, so in-process
/// callers never over-admit. Callers in other processes are not covered.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    lock: Arc<Mutex<()>>,
}

impl Arbiter {
    /// Create a new arbiter
    pub fn new() -> Self {
        Self::default()
    }
}

/// Storage-backed sliding-window rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    arbiter: Option<Arbiter>,
}

impl RateLimiter {
    /// Create a limiter over `store` using the system clock
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock: clock::system(),
            arbiter: None,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serialise `check` through `arbiter`
    pub fn with_arbiter(mut self, arbiter: Arbiter) -> Self {
        self.arbiter = Some(arbiter);
        self
    }

    /// Get current configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one attempt at `action`
    ///
    /// Drops timestamps that have left the window, rejects without recording
    /// when the remaining count is at the cap, otherwise records `now` and
    /// admits. Storage failures fail open.
    pub fn check(&self, action: &str) -> bool {
        let _guard = self
            .arbiter
            .as_ref()
            .map(|a| a.lock.lock().unwrap_or_else(PoisonError::into_inner));

        let key = self.config.storage_key(action);
        let now = self.clock.now_ms();
        let mut history = self.fresh_history(&key, now);

        if history.len() >= self.config.max_requests as usize {
            debug!(
                action,
                prefix = %self.config.key_prefix,
                count = history.len(),
                "Rate limit exceeded"
            );
            self.count_check("rejected");
            return false;
        }

        history.push(now);
        self.persist(&key, &history);

        debug!(
            action,
            prefix = %self.config.key_prefix,
            count = history.len(),
            "Attempt admitted"
        );
        self.count_check("admitted");
        true
    }

    /// Attempts left in the current window; never writes
    pub fn remaining(&self, action: &str) -> u32 {
        let key = self.config.storage_key(action);
        let fresh = self.fresh_history(&key, self.clock.now_ms()).len();
        let fresh = u32::try_from(fresh).unwrap_or(u32::MAX);
        self.config.max_requests.saturating_sub(fresh)
    }

    /// Milliseconds until the oldest stored timestamp leaves the window
    ///
    /// Computed over everything stored, including entries no `check` has
    /// pruned yet, so it can disagree with the pruned view used by `check`.
    /// Treat it as a hint; [`RateLimiter::fresh_reset_time`] gives the wait
    /// until the next slot frees.
    pub fn reset_time(&self, action: &str) -> u64 {
        let key = self.config.storage_key(action);
        let now = self.clock.now_ms();
        self.load_history(&key)
            .into_iter()
            .min()
            .map_or(0, |oldest| self.ms_until_expiry(oldest, now))
    }

    /// Milliseconds until the oldest in-window attempt expires
    pub fn fresh_reset_time(&self, action: &str) -> u64 {
        let key = self.config.storage_key(action);
        let now = self.clock.now_ms();
        self.fresh_history(&key, now)
            .into_iter()
            .min()
            .map_or(0, |oldest| self.ms_until_expiry(oldest, now))
    }

    /// Forget the history of `action`
    pub fn reset(&self, action: &str) {
        let key = self.config.storage_key(action);
        if let Err(e) = self.store.remove(&key) {
            warn!(key = %key, error = %e, "Failed to reset rate limit history");
            metrics::storage_failure("rate_limit", "remove");
            return;
        }
        metrics::RATE_LIMIT_RESETS_TOTAL
            .with_label_values(&[self.config.key_prefix.as_str()])
            .inc();
        info!(action, prefix = %self.config.key_prefix, "Rate limit reset");
    }

    /// Forget every history under this limiter's prefix
    ///
    /// Keys of limiters with a different prefix are left untouched.
    pub fn reset_all(&self) {
        let scope = self.config.key_scope();
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(prefix = %self.config.key_prefix, error = %e, "Failed to list rate limit keys");
                metrics::storage_failure("rate_limit", "keys");
                return;
            }
        };

        let mut cleared = 0usize;
        for key in keys.iter().filter(|k| k.starts_with(&scope)) {
            match self.store.remove(key) {
                Ok(()) => cleared += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to remove rate limit history");
                    metrics::storage_failure("rate_limit", "remove");
                }
            }
        }

        metrics::RATE_LIMIT_RESETS_TOTAL
            .with_label_values(&[self.config.key_prefix.as_str()])
            .inc_by(cleared as u64);
        info!(prefix = %self.config.key_prefix, cleared, "All rate limits reset");
    }

    /// Stored history; unreadable or malformed records count as empty
    fn load_history(&self, key: &str) -> Vec<i64> {
        match self.store.get(key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Discarding malformed rate limit history");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read rate limit history");
                metrics::storage_failure("rate_limit", "get");
                Vec::new()
            }
        }
    }

    fn fresh_history(&self, key: &str, now: i64) -> Vec<i64> {
        let window = self.window_ms();
        let mut history = self.load_history(key);
        history.retain(|&ts| now.saturating_sub(ts) < window);
        history
    }

    fn persist(&self, key: &str, history: &[i64]) {
        let result = serde_json::to_string(history)
            .map_err(crate::storage::StorageError::from)
            .and_then(|json| self.store.set(key, &json));

        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist rate limit history");
            metrics::storage_failure("rate_limit", "set");
        }
    }

    fn ms_until_expiry(&self, oldest: i64, now: i64) -> u64 {
        let expires_at = oldest.saturating_add(self.window_ms());
        u64::try_from(expires_at.saturating_sub(now)).unwrap_or(0)
    }

    fn window_ms(&self) -> i64 {
        i64::try_from(self.config.window_ms).unwrap_or(i64::MAX)
    }

    fn count_check(&self, outcome: &str) {
        metrics::RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&[self.config.key_prefix.as_str(), outcome])
            .inc();
    }
}
