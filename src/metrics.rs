//! Prometheus metrics for node traffic, the chain cache and pipeline stages

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

pub struct Metrics {
    registry: Registry,

    // Node transport
    pub node_requests: IntCounter,
    pub node_errors: IntCounter,
    pub endpoint_cooldowns: IntCounter,

    // Chain cache
    pub cache_hits: IntCounter,
    pub cache_misses: IntCounter,
    pub cache_coalesced: IntCounter,
    pub cache_evictions: IntCounter,

    // Pipeline
    pub operations_prepared: IntCounter,
    pub reveals_injected: IntCounter,
    pub estimations: IntCounter,
    pub simulation_rejections: IntCounter,
    pub operations_forged: IntCounter,
    pub operations_injected: IntCounter,
    pub injection_failures: IntCounter,

    // Gauges
    pub available_endpoints: IntGauge,
    pub cache_entries: IntGauge,

    // Histograms
    pub node_latency: Histogram,
    pub prepare_latency: Histogram,
    pub estimate_latency: Histogram,
    pub forge_latency: Histogram,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let node_requests = counter("node_requests_total", "Requests sent to Tezos nodes")?;
        let node_errors = counter("node_errors_total", "Node requests that failed")?;
        let endpoint_cooldowns = counter(
            "node_endpoint_cooldowns_total",
            "Times an endpoint was put in cooldown",
        )?;

        let cache_hits = counter("chain_cache_hits_total", "Chain reads served from cache")?;
        let cache_misses = counter("chain_cache_misses_total", "Chain reads sent to the node")?;
        let cache_coalesced = counter(
            "chain_cache_coalesced_total",
            "Chain reads that joined an in-flight request",
        )?;
        let cache_evictions = counter(
            "chain_cache_evictions_total",
            "Live entries evicted to stay within capacity",
        )?;

        let operations_prepared =
            counter("operations_prepared_total", "Operation groups prepared")?;
        let reveals_injected = counter(
            "reveals_injected_total",
            "Reveals synthesized for unrevealed sources",
        )?;
        let estimations = counter("estimations_total", "Simulation-based estimations run")?;
        let simulation_rejections = counter(
            "simulation_rejections_total",
            "Simulations the node reported as not applied",
        )?;
        let operations_forged = counter("operations_forged_total", "Operation groups forged")?;
        let operations_injected =
            counter("operations_injected_total", "Operation groups injected")?;
        let injection_failures =
            counter("injection_failures_total", "Injections rejected or failed")?;

        let available_endpoints = IntGauge::with_opts(Opts::new(
            "node_available_endpoints",
            "Endpoints not in cooldown",
        ))?;
        let cache_entries =
            IntGauge::with_opts(Opts::new("chain_cache_entries", "Live chain cache entries"))?;

        let node_latency = Histogram::with_opts(
            HistogramOpts::new("node_latency_seconds", "Node request latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )?;
        let prepare_latency = Histogram::with_opts(
            HistogramOpts::new("prepare_latency_seconds", "Operation preparation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        )?;
        let estimate_latency = Histogram::with_opts(
            HistogramOpts::new("estimate_latency_seconds", "Estimation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        let forge_latency = Histogram::with_opts(
            HistogramOpts::new("forge_latency_seconds", "Local forging latency")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01]),
        )?;

        registry.register(Box::new(node_requests.clone()))?;
        registry.register(Box::new(node_errors.clone()))?;
        registry.register(Box::new(endpoint_cooldowns.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_coalesced.clone()))?;
        registry.register(Box::new(cache_evictions.clone()))?;
        registry.register(Box::new(operations_prepared.clone()))?;
        registry.register(Box::new(reveals_injected.clone()))?;
        registry.register(Box::new(estimations.clone()))?;
        registry.register(Box::new(simulation_rejections.clone()))?;
        registry.register(Box::new(operations_forged.clone()))?;
        registry.register(Box::new(operations_injected.clone()))?;
        registry.register(Box::new(injection_failures.clone()))?;
        registry.register(Box::new(available_endpoints.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(node_latency.clone()))?;
        registry.register(Box::new(prepare_latency.clone()))?;
        registry.register(Box::new(estimate_latency.clone()))?;
        registry.register(Box::new(forge_latency.clone()))?;

        Ok(Self {
            registry,
            node_requests,
            node_errors,
            endpoint_cooldowns,
            cache_hits,
            cache_misses,
            cache_coalesced,
            cache_evictions,
            operations_prepared,
            reveals_injected,
            estimations,
            simulation_rejections,
            operations_forged,
            operations_injected,
            injection_failures,
            available_endpoints,
            cache_entries,
            node_latency,
            prepare_latency,
            estimate_latency,
            forge_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn render(&self) -> String {
        use prometheus::Encoder;

        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(|| {
        Metrics::new().expect("static metric definitions are valid")
    });
    &METRICS
}

/// Measures a stage and records it into a histogram
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_includes_registered_names() {
        let m = Metrics::new().unwrap();
        m.node_requests.inc();
        m.cache_hits.inc_by(3);
        let text = m.render();
        assert!(text.contains("node_requests_total 1"));
        assert!(text.contains("chain_cache_hits_total 3"));
    }

    #[test]
    fn test_timer_observes_into_histogram() {
        let m = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&m.forge_latency);
        assert_eq!(m.forge_latency.get_sample_count(), 1);
    }
}
