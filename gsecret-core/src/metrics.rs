use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Process-wide Prometheus registry shared by the HTTP surface and every
/// stage that wants to publish a counter or gauge. Scoped down from
/// `ando-observability::MetricsCollector`'s gateway-wide collector (no
/// bandwidth or Lua-pool gauges — this broker has neither) but built the
/// same way: one `Registry`, metrics as public fields, a `gather_text()`
/// for the `/metrics` scrape endpoint.
pub struct Metrics {
    registry: Registry,

    /// Total secret requests handled, by chain/operation/status.
    pub requests_total: IntCounterVec,
    /// Request latency, by chain/operation.
    pub request_duration: HistogramVec,

    /// Cache stage lookups, by chain and lookup kind (`id`/`key`), split
    /// hit/miss.
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,

    /// Rate-limiter stage: number of requests currently buffered per
    /// bucket, sampled from `BufferController`'s pending queue.
    pub rate_limiter_queue_depth: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("gsecret_requests_total", "Total secret requests handled")
                .namespace("gsecret"),
            &["chain", "operation", "status"],
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new("gsecret_request_duration_seconds", "Request latency")
                .namespace("gsecret")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ]),
            &["chain", "operation"],
        )?;

        let cache_hits_total = IntCounterVec::new(
            Opts::new("gsecret_cache_hits_total", "Cache stage hits").namespace("gsecret"),
            &["chain", "lookup"],
        )?;

        let cache_misses_total = IntCounterVec::new(
            Opts::new("gsecret_cache_misses_total", "Cache stage misses").namespace("gsecret"),
            &["chain", "lookup"],
        )?;

        let rate_limiter_queue_depth = IntGaugeVec::new(
            Opts::new(
                "gsecret_rate_limiter_queue_depth",
                "Requests currently buffered per rate-limit bucket",
            )
            .namespace("gsecret"),
            &["bucket"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(rate_limiter_queue_depth.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            cache_hits_total,
            cache_misses_total,
            rate_limiter_queue_depth,
        })
    }

    pub fn record_request(&self, chain: &str, operation: &str, status: u16, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[chain, operation, &status.to_string()])
            .inc();
        self.request_duration
            .with_label_values(&[chain, operation])
            .observe(duration_secs);
    }

    pub fn record_cache_hit(&self, chain: &str, lookup: &str) {
        self.cache_hits_total.with_label_values(&[chain, lookup]).inc();
    }

    pub fn record_cache_miss(&self, chain: &str, lookup: &str) {
        self.cache_misses_total.with_label_values(&[chain, lookup]).inc();
    }

    pub fn inc_rate_limiter_queue_depth(&self, bucket: &str) {
        self.rate_limiter_queue_depth.with_label_values(&[bucket]).inc();
    }

    pub fn dec_rate_limiter_queue_depth(&self, bucket: &str) {
        self.rate_limiter_queue_depth.with_label_values(&[bucket]).dec();
    }

    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer).unwrap_or_default();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_requests_surface_in_the_text_exposition() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("default", "get_secret_key", 200, 0.003);
        let text = metrics.gather_text();
        assert!(text.contains("gsecret_requests_total"));
        assert!(text.contains("gsecret_request_duration_seconds"));
    }

    #[test]
    fn cache_hit_and_miss_counters_are_independent() {
        let metrics = Metrics::new().unwrap();
        metrics.record_cache_hit("default", "id");
        metrics.record_cache_hit("default", "id");
        metrics.record_cache_miss("default", "key");
        let text = metrics.gather_text();
        assert!(text.contains("gsecret_cache_hits_total{chain=\"default\",lookup=\"id\"} 2"));
        assert!(text.contains("gsecret_cache_misses_total{chain=\"default\",lookup=\"key\"} 1"));
    }

    #[test]
    fn rate_limiter_queue_depth_tracks_inc_and_dec() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_rate_limiter_queue_depth("bucket-a");
        metrics.inc_rate_limiter_queue_depth("bucket-a");
        metrics.dec_rate_limiter_queue_depth("bucket-a");
        let text = metrics.gather_text();
        assert!(text.contains("gsecret_rate_limiter_queue_depth{bucket=\"bucket-a\"} 1"));
    }
}
