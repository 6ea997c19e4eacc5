// Prometheus metrics for hubguard
//
// Counters track:
// - Rate-limit admissions and rejections per limiter prefix
// - Rate-limit resets
// - CSRF tokens issued and validation outcomes
// - Storage failures absorbed by the fail-open policy

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Rate limiter metrics
    pub static ref RATE_LIMIT_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("rate_limit_checks_total", "Rate limit checks by outcome"),
        &["prefix", "outcome"]
    ).expect("Failed to create rate limit checks metric");

    pub static ref RATE_LIMIT_RESETS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("rate_limit_resets_total", "Rate limit histories cleared"),
        &["prefix"]
    ).expect("Failed to create rate limit resets metric");

    // CSRF metrics
    pub static ref CSRF_TOKENS_ISSUED_TOTAL: IntCounter = IntCounter::new(
        "csrf_tokens_issued_total",
        "Total number of CSRF tokens generated"
    ).expect("Failed to create CSRF tokens issued metric");

    pub static ref CSRF_VALIDATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("csrf_validations_total", "CSRF token validations by outcome"),
        &["outcome"]
    ).expect("Failed to create CSRF validations metric");

    // Storage metrics
    pub static ref STORAGE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("storage_failures_total", "Storage failures absorbed by components"),
        &["component", "operation"]
    ).expect("Failed to create storage failures metric");
}

/// Initialize metrics registry - must be called once per process
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(RATE_LIMIT_CHECKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RATE_LIMIT_RESETS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CSRF_TOKENS_ISSUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CSRF_VALIDATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_FAILURES_TOTAL.clone()))?;
    Ok(())
}

/// Count a storage failure that a component absorbed
pub(crate) fn storage_failure(component: &str, operation: &str) {
    STORAGE_FAILURES_TOTAL
        .with_label_values(&[component, operation])
        .inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&["metrics_test", "admitted"])
            .get();
        RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&["metrics_test", "admitted"])
            .inc();
        let after = RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&["metrics_test", "admitted"])
            .get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_gather_after_init() {
        // May already be registered by another test in this process
        let _ = init();

        CSRF_TOKENS_ISSUED_TOTAL.inc();
        let text = gather().unwrap();
        assert!(text.contains("csrf_tokens_issued_total"));
    }
}
