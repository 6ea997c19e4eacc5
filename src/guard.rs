//! Trust boundary for state-changing operations
//!
//! Runs the two independent checks a form submission or login goes through
//! before it is honoured: the action's rate limiter, then the session's CSRF
//! token.

use tracing::{debug, info};

use crate::csrf::CsrfTokenManager;
use crate::rate_limit::RateLimiter;

/// Why a submission was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Too many recent attempts at this action
    #[error("Too many attempts at '{action}'. Retry in {retry_after_ms}ms")]
    RateLimited { action: String, retry_after_ms: u64 },

    /// Missing, expired or forged CSRF token
    #[error("Invalid or expired CSRF token")]
    InvalidToken,
}

/// Rate limiter and CSRF manager guarding one class of operations
#[derive(Debug, Clone)]
pub struct TrustBoundary {
    limiter: RateLimiter,
    csrf: CsrfTokenManager,
}

impl TrustBoundary {
    /// Create a new trust boundary
    pub fn new(limiter: RateLimiter, csrf: CsrfTokenManager) -> Self {
        Self { limiter, csrf }
    }

    /// Token to embed in a form being rendered
    pub fn issue_token(&self) -> String {
        self.csrf.get_token()
    }

    /// Admit a submission of `action` carrying `submitted_token`
    ///
    /// The attempt counts against the quota even if the token is then
    /// rejected, so token guessing is throttled too.
    pub fn authorize(&self, action: &str, submitted_token: &str) -> Result<(), Rejection> {
        if !self.limiter.check(action) {
            let retry_after_ms = self.limiter.fresh_reset_time(action);
            debug!(action, retry_after_ms, "Submission rate limited");
            return Err(Rejection::RateLimited {
                action: action.to_string(),
                retry_after_ms,
            });
        }

        if !self.csrf.validate_token(submitted_token) {
            debug!(action, "Submission carried an invalid CSRF token");
            return Err(Rejection::InvalidToken);
        }

        Ok(())
    }

    /// Rotate the CSRF token after a sensitive operation succeeded
    pub fn rotate_token(&self) -> String {
        info!("Rotating CSRF token after sensitive operation");
        self.csrf.refresh_token()
    }

    /// Get the rate limiter
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
