//! Metrics collection for observability
//!
//! Prometheus metrics for the settlement core, held in a private registry.
//!
//! # Metrics
//!
//! - `settlement_optimizations_total` - Optimization runs
//! - `settlement_optimization_duration_seconds` - Optimization latency
//! - `settlement_optimizer_fallbacks_total` - Runs that fell back to direct settlement
//! - `settlement_validations_total{outcome}` - Validation runs by outcome
//! - `settlement_validation_cache_total{result}` - Validation cache hits and misses
//! - `settlement_proofs_total` - Proofs generated
//! - `settlement_proof_verification_failures_total` - Proofs that failed verification
//! - `settlement_warnings_total{severity}` - Warnings raised
//! - `settlement_monitored_sessions` - Sessions under monitoring

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Optimization runs
    pub optimizations_total: IntCounter,

    /// Optimization latency histogram
    pub optimization_duration: Histogram,

    /// Optimizer timeouts answered with the direct plan
    pub optimizer_fallbacks: IntCounter,

    /// Validation runs by outcome
    pub validations_total: IntCounterVec,

    /// Validation cache lookups by result
    pub validation_cache: IntCounterVec,

    /// Proofs generated
    pub proofs_total: IntCounter,

    /// Proofs that failed verification
    pub proof_verification_failures: IntCounter,

    /// Warnings raised by severity
    pub warnings_total: IntCounterVec,

    /// Sessions under monitoring
    pub monitored_sessions: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("optimizations_total", &self.optimizations_total.get())
            .field("proofs_total", &self.proofs_total.get())
            .field("monitored_sessions", &self.monitored_sessions.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let optimizations_total =
            IntCounter::new("settlement_optimizations_total", "Optimization runs")?;
        registry.register(Box::new(optimizations_total.clone()))?;

        let optimization_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_optimization_duration_seconds",
                "Histogram of optimization latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 2.0, 5.0]),
        )?;
        registry.register(Box::new(optimization_duration.clone()))?;

        let optimizer_fallbacks = IntCounter::new(
            "settlement_optimizer_fallbacks_total",
            "Optimizations answered with the direct plan",
        )?;
        registry.register(Box::new(optimizer_fallbacks.clone()))?;

        let validations_total = IntCounterVec::new(
            Opts::new("settlement_validations_total", "Validation runs by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(validations_total.clone()))?;

        let validation_cache = IntCounterVec::new(
            Opts::new("settlement_validation_cache_total", "Validation cache lookups"),
            &["result"],
        )?;
        registry.register(Box::new(validation_cache.clone()))?;

        let proofs_total = IntCounter::new("settlement_proofs_total", "Proofs generated")?;
        registry.register(Box::new(proofs_total.clone()))?;

        let proof_verification_failures = IntCounter::new(
            "settlement_proof_verification_failures_total",
            "Proofs that failed verification",
        )?;
        registry.register(Box::new(proof_verification_failures.clone()))?;

        let warnings_total = IntCounterVec::new(
            Opts::new("settlement_warnings_total", "Warnings raised by severity"),
            &["severity"],
        )?;
        registry.register(Box::new(warnings_total.clone()))?;

        let monitored_sessions =
            IntGauge::new("settlement_monitored_sessions", "Sessions under monitoring")?;
        registry.register(Box::new(monitored_sessions.clone()))?;

        Ok(Self {
            optimizations_total,
            optimization_duration,
            optimizer_fallbacks,
            validations_total,
            validation_cache,
            proofs_total,
            proof_verification_failures,
            warnings_total,
            monitored_sessions,
            registry,
        })
    }

    /// Record a finished optimization
    pub fn record_optimization(&self, duration_seconds: f64) {
        self.optimizations_total.inc();
        self.optimization_duration.observe(duration_seconds);
    }

    /// Record an optimizer fallback
    pub fn record_optimizer_fallback(&self) {
        self.optimizer_fallbacks.inc();
    }

    /// Record a validation outcome
    pub fn record_validation(&self, passed: bool) {
        let outcome = if passed { "passed" } else { "failed" };
        self.validations_total.with_label_values(&[outcome]).inc();
    }

    /// Record a validation cache lookup
    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.validation_cache.with_label_values(&[result]).inc();
    }

    /// Record a generated proof
    pub fn record_proof(&self) {
        self.proofs_total.inc();
    }

    /// Record a failed proof verification
    pub fn record_proof_verification_failure(&self) {
        self.proof_verification_failures.inc();
    }

    /// Record a raised warning
    pub fn record_warning(&self, severity: &str) {
        self.warnings_total.with_label_values(&[severity]).inc();
    }

    /// Update monitored session count
    pub fn set_monitored_sessions(&self, count: usize) {
        self.monitored_sessions.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.optimizations_total.get(), 0);
        assert_eq!(metrics.monitored_sessions.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors in one process must not collide
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_optimization(0.01);
        assert_eq!(a.optimizations_total.get(), 1);
        assert_eq!(b.optimizations_total.get(), 0);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_validation(true);
        metrics.record_validation(false);
        metrics.record_validation(false);
        metrics.record_cache_lookup(true);

        assert_eq!(metrics.validations_total.with_label_values(&["failed"]).get(), 2);
        assert_eq!(metrics.validation_cache.with_label_values(&["hit"]).get(), 1);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_warning("minor");
        let text = metrics.render();
        assert!(text.contains("settlement_warnings_total"));
    }
}
