//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Ginchy metrics
pub const METRICS_PREFIX: &str = "ginchy";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s - image deadline
    30.00,  // 30s
];

/// Buckets for provider calls; video jobs run for minutes
pub const GENERATION_BUCKETS: &[f64] = &[
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    15.00,  // 15s
    20.00,  // 20s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
    300.0,  // 5m
    330.0,  // 5.5m - video deadline
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Generation attempts by processor, kind and outcome"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time from dispatch to a usable media URL"
    );

    describe_counter!(
        format!("{}_provider_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Times a provider failure was absorbed by the fallback chain"
    );

    // Credit metrics
    describe_counter!(
        format!("{}_credits_charged_total", METRICS_PREFIX),
        Unit::Count,
        "Credits debited on committed generations"
    );

    // Character training
    describe_counter!(
        format!("{}_training_updates_total", METRICS_PREFIX),
        Unit::Count,
        "Character training status transitions"
    );

    // Worker metrics
    describe_counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        Unit::Count,
        "Async generation jobs finished by the worker"
    );

    describe_counter!(
        format!("{}_jobs_requeued_total", METRICS_PREFIX),
        Unit::Count,
        "Stale processing jobs requeued or failed by the sweeper"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a dispatch outcome
pub fn record_generation(duration_secs: f64, processor: &str, kind: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        "processor" => processor.to_string(),
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "processor" => processor.to_string(),
            "kind" => kind.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record one hop down the fallback chain
pub fn record_fallback(from: &str, to: &str) {
    counter!(
        format!("{}_provider_fallbacks_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_credits_charged(kind: &str, credits: i32) {
    counter!(
        format!("{}_credits_charged_total", METRICS_PREFIX),
        "kind" => kind.to_string()
    )
    .increment(credits.max(0) as u64);
}

pub fn record_training_update(status: &str) {
    counter!(
        format!("{}_training_updates_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_job(status: &str) {
    counter!(
        format!("{}_jobs_processed_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_requeued(count: u64) {
    counter!(format!("{}_jobs_requeued_total", METRICS_PREFIX)).increment(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, GENERATION_BUCKETS] {
            let mut prev = 0.0;
            for &bucket in buckets {
                assert!(bucket > prev);
                prev = bucket;
            }
        }

        // Both outer deadlines land on a bucket edge
        assert!(LATENCY_BUCKETS.contains(&20.0));
        assert!(GENERATION_BUCKETS.contains(&330.0));
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/v1/generate");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }
}
