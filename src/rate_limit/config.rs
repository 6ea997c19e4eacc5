//! Rate Limit Configuration
//!
//! Quota definition for one sliding-window limiter: "`max_requests` admitted
//! attempts per rolling `window_ms`", stored under `key_prefix`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default rate limits
pub const DEFAULT_MAX_REQUESTS: u32 = 10;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// Reasons a limiter configuration is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitConfigError {
    #[error("max_requests must be > 0")]
    ZeroMaxRequests,

    #[error("window_ms must be > 0")]
    ZeroWindow,

    #[error("key_prefix must not be empty")]
    EmptyPrefix,
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admitted attempts allowed per window
    pub max_requests: u32,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Prefix of every storage key this limiter owns
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new(max_requests: u32, window_ms: u64, key_prefix: impl Into<String>) -> Self {
        Self {
            max_requests,
            window_ms,
            key_prefix: key_prefix.into(),
        }
    }

    /// General API calls: 30 per minute
    pub fn api() -> Self {
        Self::new(30, 60_000, "api_rate_limit")
    }

    /// Login and other auth attempts: 5 per 5 minutes
    pub fn auth() -> Self {
        Self::new(5, 300_000, "auth_rate_limit")
    }

    /// Form submissions: 3 per minute
    pub fn form_submit() -> Self {
        Self::new(3, 60_000, "form_rate_limit")
    }

    /// Get window duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Storage key holding the history of `action`
    pub fn storage_key(&self, action: &str) -> String {
        format!("{}_{}", self.key_prefix, action)
    }

    /// Leading part shared by every key this limiter owns
    pub fn key_scope(&self) -> String {
        format!("{}_", self.key_prefix)
    }

    /// Whether `reset_all` on either limiter could remove the other's keys
    pub fn overlaps(&self, other: &RateLimitConfig) -> bool {
        let (a, b) = (self.key_scope(), other.key_scope());
        a.starts_with(&b) || b.starts_with(&a)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RateLimitConfigError> {
        if self.max_requests == 0 {
            return Err(RateLimitConfigError::ZeroMaxRequests);
        }
        if self.window_ms == 0 {
            return Err(RateLimitConfigError::ZeroWindow);
        }
        if self.key_prefix.is_empty() {
            return Err(RateLimitConfigError::EmptyPrefix);
        }
        Ok(())
    }
}
