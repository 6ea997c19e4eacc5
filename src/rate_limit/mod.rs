//! Rate Limiting Module
//!
//! Client-side sliding-window rate limiting for sensitive operations such as
//! login attempts and form submissions.
//!
//! # Features
//!
//! - Sliding window: the cutoff moves with every call instead of resetting
//!   on fixed boundaries
//! - Only admitted attempts consume quota
//! - One history per action key, persisted through a [`KeyValueStore`]
//! - Independent limiters share one store through distinct key prefixes
//! - Fail-open on unreadable or corrupt history
//!
//! # Architecture
//!
//! ```text
//!   api_rate_limit_*     auth_rate_limit_*     form_rate_limit_*
//!     RateLimiter           RateLimiter           RateLimiter
//!          \                    |                    /
//!           +---- KeyValueStore (FileStore / MemoryStore) ----+
//! ```
//!
//! [`KeyValueStore`]: crate::storage::KeyValueStore

pub mod config;
pub mod limiter;

pub use config::{RateLimitConfig, RateLimitConfigError};
pub use limiter::{Arbiter, RateLimiter};

// Property-based tests module
#[cfg(test)]
mod proptests;
