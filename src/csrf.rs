//! CSRF (Cross-Site Request Forgery) token manager
//!
//! Keeps one anti-forgery token per session slot:
//! - 32 bytes from a cryptographically secure RNG, hex encoded
//! - Stored as `{"value", "timestamp"}` under a fixed key in the session store
//! - Expires one hour after issue by default
//! - Validated with a constant-time comparison
//!
//! Corrupt or missing records behave like "no token": `get_token` issues a new
//! one and `validate_token` rejects.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::clock::{self, Clock};
use crate::metrics;
use crate::storage::KeyValueStore;

/// Token lifetime in milliseconds (1 hour)
pub const TOKEN_EXPIRY_MS: u64 = 3_600_000;

/// Token entropy in bytes (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Storage key of the single token slot
pub const CSRF_STORAGE_KEY: &str = "csrf_token";

/// CSRF configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Token lifetime in milliseconds
    pub token_expiry_ms: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_expiry_ms: TOKEN_EXPIRY_MS,
        }
    }
}

/// Persisted token record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Hex-encoded token
    pub value: String,

    /// Issue time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TokenRecord {
    fn is_expired(&self, now: i64, expiry_ms: u64) -> bool {
        let age = now.saturating_sub(self.timestamp);
        age > i64::try_from(expiry_ms).unwrap_or(i64::MAX)
    }
}

/// What the token slot currently holds
#[derive(Debug)]
enum Slot {
    Empty,
    Corrupt,
    Expired,
    Live(TokenRecord),
}

impl Slot {
    fn label(&self) -> &'static str {
        match self {
            Slot::Empty => "missing",
            Slot::Corrupt => "corrupt",
            Slot::Expired => "expired",
            Slot::Live(_) => "live",
        }
    }
}

/// Single-slot CSRF token manager
///
/// Construct one per session and hand it to the code that renders forms and
/// the code that accepts submissions.
#[derive(Debug, Clone)]
pub struct CsrfTokenManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: CsrfConfig,
}

impl CsrfTokenManager {
    /// Create a manager over the session store using the system clock
    pub fn new(store: Arc<dyn KeyValueStore>, config: CsrfConfig) -> Self {
        Self {
            store,
            clock: clock::system(),
            config,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Issue a new token, replacing any stored one
    ///
    /// The token is returned even if it could not be persisted; it will then
    /// fail validation.
    pub fn generate_token(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);

        let record = TokenRecord {
            value: hex::encode(bytes),
            timestamp: self.clock.now_ms(),
        };

        let result = serde_json::to_string(&record)
            .map_err(crate::storage::StorageError::from)
            .and_then(|json| self.store.set(CSRF_STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist CSRF token");
            metrics::storage_failure("csrf", "set");
        }

        metrics::CSRF_TOKENS_ISSUED_TOTAL.inc();
        debug!(issued_at = record.timestamp, "CSRF token generated");
        record.value
    }

    /// Current token, issuing a fresh one if the slot is empty, corrupt or expired
    pub fn get_token(&self) -> String {
        match self.slot() {
            Slot::Live(record) => record.value,
            other => {
                debug!(slot = other.label(), "Issuing new CSRF token");
                self.generate_token()
            }
        }
    }

    /// Check a submitted token against the stored one
    pub fn validate_token(&self, submitted: &str) -> bool {
        if submitted.is_empty() {
            return self.record_validation("empty", false);
        }

        match self.slot() {
            Slot::Live(record) => {
                if constant_time_eq(submitted, &record.value) {
                    self.record_validation("valid", true)
                } else {
                    self.record_validation("mismatch", false)
                }
            }
            other => self.record_validation(other.label(), false),
        }
    }

    /// Remove the stored token
    pub fn clear_token(&self) {
        if let Err(e) = self.store.remove(CSRF_STORAGE_KEY) {
            warn!(error = %e, "Failed to clear CSRF token");
            metrics::storage_failure("csrf", "remove");
            return;
        }
        debug!("CSRF token cleared");
    }

    /// Rotate the token, typically after a successful sensitive operation
    pub fn refresh_token(&self) -> String {
        self.clear_token();
        let token = self.generate_token();
        info!("CSRF token rotated");
        token
    }

    fn slot(&self) -> Slot {
        let raw = match self.store.get(CSRF_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Slot::Empty,
            Err(e) => {
                warn!(error = %e, "Failed to read CSRF token");
                metrics::storage_failure("csrf", "get");
                return Slot::Empty;
            }
        };

        let record: TokenRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Discarding malformed CSRF token record");
                return Slot::Corrupt;
            }
        };

        if record.is_expired(self.clock.now_ms(), self.config.token_expiry_ms) {
            Slot::Expired
        } else {
            Slot::Live(record)
        }
    }

    fn record_validation(&self, outcome: &str, valid: bool) -> bool {
        metrics::CSRF_VALIDATIONS_TOTAL
            .with_label_values(&[outcome])
            .inc();
        if !valid {
            debug!(outcome, "CSRF token rejected");
        }
        valid
    }
}

/// Compare two strings without an early exit on the first differing byte
///
/// Strings of different length are rejected up front; token length is fixed
/// and public, so that branch leaks nothing useful.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryStore, StorageError};
    use proptest::prelude::*;

    /// Store whose every operation fails
    #[derive(Debug)]
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
    }

    fn manager() -> (CsrfTokenManager, ManualClock, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let manager = CsrfTokenManager::new(store.clone(), CsrfConfig::default())
            .with_clock(Arc::new(clock.clone()));
        (manager, clock, store)
    }

    #[test]
    fn test_generate_token_format() {
        let (manager, _clock, _store) = manager();
        let token = manager.generate_token();

        // 32 bytes = 64 lowercase hex characters
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_generate_token_uniqueness() {
        let (manager, _clock, _store) = manager();
        assert_ne!(manager.generate_token(), manager.generate_token());
    }

    #[test]
    fn test_unpersisted_token_returned_but_rejected() {
        let manager = CsrfTokenManager::new(Arc::new(BrokenStore), CsrfConfig::default())
            .with_clock(Arc::new(ManualClock::new(0)));

        let token = manager.generate_token();
        assert_eq!(token.len(), 64);
        assert!(!manager.validate_token(&token));

        // Nothing sticks, so every read issues a new token
        assert_ne!(manager.get_token(), token);
        manager.clear_token();
    }

    #[test]
    fn test_stored_record_shape() {
        let (manager, clock, store) = manager();
        clock.set(1_700_000_000_000);
        let token = manager.generate_token();

        let raw = store.get(CSRF_STORAGE_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["value"], serde_json::Value::String(token));
        assert_eq!(json["timestamp"], serde_json::json!(1_700_000_000_000i64));
    }

    #[test]
    fn test_token_round_trip() {
        let (manager, _clock, _store) = manager();
        let token = manager.generate_token();

        assert!(manager.validate_token(&token));
        assert!(!manager.validate_token(&format!("{token}x")));
        assert!(!manager.validate_token(""));
    }

    #[test]
    fn test_generate_replaces_previous_token() {
        let (manager, _clock, _store) = manager();
        let first = manager.generate_token();
        let second = manager.generate_token();

        assert!(!manager.validate_token(&first));
        assert!(manager.validate_token(&second));
    }

    #[test]
    fn test_token_expiry() {
        let (manager, clock, _store) = manager();
        let token = manager.generate_token();

        clock.set(3_599_999);
        assert!(manager.validate_token(&token));

        clock.set(3_600_000);
        assert!(manager.validate_token(&token));

        clock.set(3_600_001);
        assert!(!manager.validate_token(&token));
    }

    #[test]
    fn test_get_token_idempotent_within_window() {
        let (manager, clock, _store) = manager();

        let first = manager.get_token();
        clock.set(1_000_000);
        let second = manager.get_token();
        assert_eq!(first, second);

        clock.set(3_600_001);
        let third = manager.get_token();
        assert_ne!(first, third);
        assert!(manager.validate_token(&third));
    }

    #[test]
    fn test_get_token_replaces_corrupt_record() {
        let (manager, _clock, store) = manager();
        store.set(CSRF_STORAGE_KEY, "{not json").unwrap();

        assert!(!manager.validate_token("anything"));

        let token = manager.get_token();
        assert_eq!(token.len(), 64);
        assert!(manager.validate_token(&token));
    }

    #[test]
    fn test_validate_without_token() {
        let (manager, _clock, _store) = manager();
        assert!(!manager.validate_token(&"a".repeat(64)));
    }

    #[test]
    fn test_clear_token() {
        let (manager, _clock, store) = manager();
        let token = manager.generate_token();

        manager.clear_token();
        assert_eq!(store.get(CSRF_STORAGE_KEY).unwrap(), None);
        assert!(!manager.validate_token(&token));
    }

    #[test]
    fn test_refresh_token_rotates() {
        let (manager, _clock, _store) = manager();
        let old = manager.get_token();
        let new = manager.refresh_token();

        assert_ne!(old, new);
        assert!(!manager.validate_token(&old));
        assert!(manager.validate_token(&new));
    }

    #[test]
    fn test_custom_expiry() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(0);
        let manager = CsrfTokenManager::new(store, CsrfConfig { token_expiry_ms: 1_000 })
            .with_clock(Arc::new(clock.clone()));

        let token = manager.get_token();
        clock.set(1_001);
        assert!(!manager.validate_token(&token));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(constant_time_eq("", ""));
    }

    proptest! {
        /// Equal-length strings compare equal exactly when identical
        #[test]
        fn prop_constant_time_eq_equal_length(
            a in "[0-9a-f]{0,64}",
            flip in any::<prop::sample::Index>()
        ) {
            prop_assert!(constant_time_eq(&a, &a.clone()));

            if !a.is_empty() {
                let idx = flip.index(a.len());
                let mut bytes = a.clone().into_bytes();
                bytes[idx] = if bytes[idx] == b'0' { b'1' } else { b'0' };
                let b = String::from_utf8(bytes).unwrap();
                prop_assert!(!constant_time_eq(&a, &b));
            }
        }

        /// Comparator agrees with `==` for arbitrary input
        #[test]
        fn prop_constant_time_eq_matches_equality(a in ".{0,16}", b in ".{0,16}") {
            prop_assert_eq!(constant_time_eq(&a, &b), a == b);
        }
    }
}
