//! hubguard Library
//!
//! Client-side abuse prevention for the distributor hub: a storage-backed
//! sliding-window rate limiter and a single-slot CSRF token manager, plus the
//! storage, clock, configuration and metrics plumbing they share.
//!
//! Components are plain values built once at startup and passed to callers:
//!
//! ```
//! use std::sync::Arc;
//! use hubguard::csrf::{CsrfConfig, CsrfTokenManager};
//! use hubguard::rate_limit::{RateLimitConfig, RateLimiter};
//! use hubguard::storage::MemoryStore;
//!
//! let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), RateLimitConfig::form_submit());
//! let csrf = CsrfTokenManager::new(Arc::new(MemoryStore::new()), CsrfConfig::default());
//!
//! let token = csrf.get_token();
//! assert!(limiter.check("form-submit-registration"));
//! assert!(csrf.validate_token(&token));
//! ```

pub mod clock;
pub mod config;
pub mod csrf;
pub mod guard;
pub mod metrics;
pub mod rate_limit;
pub mod storage;

pub use csrf::CsrfTokenManager;
pub use guard::{Rejection, TrustBoundary};
pub use rate_limit::{RateLimitConfig, RateLimiter};
