//! Metrics for the replication pipeline.
//!
//! A process-local registry of counters, gauges, and latency histograms,
//! exportable as JSON or Prometheus text. Both sides of the pipeline share
//! one registry so cache coherence and projector lag can be read together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

/// Predefined metric names
pub mod metric_names {
    // Write side
    pub const EVENTS_PUBLISHED: &str = "engagement.events.published";
    pub const PUBLISH_FAILURES: &str = "engagement.events.publish_failures";
    pub const LEDGER_WRITES: &str = "engagement.ledger.writes";

    // Read side
    pub const EVENTS_APPLIED: &str = "engagement.events.applied";
    pub const DUPLICATES_SKIPPED: &str = "engagement.events.duplicates_skipped";
    pub const PROJECTION_GAPS: &str = "engagement.events.projection_gaps";

    // Cache
    pub const CACHE_HITS: &str = "engagement.cache.hits";
    pub const CACHE_MISSES: &str = "engagement.cache.misses";
    pub const CACHE_ERRORS: &str = "engagement.cache.errors";
    pub const CACHE_INVALIDATIONS: &str = "engagement.cache.invalidations";

    // Latency histograms
    pub const APPLY_LATENCY: &str = "engagement.apply.latency_seconds";
    pub const LEDGER_LATENCY: &str = "engagement.ledger.latency_seconds";

    // Gauges
    pub const PARTITION_WORKERS: &str = "engagement.projector.workers";
}

/// Process-local metrics registry.
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter by one.
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter, creating it on first touch.
    pub async fn add_counter(&self, name: &str, value: u64) {
        {
            let counters = self.counters.read().await;
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge to an absolute value.
    pub async fn set_gauge(&self, name: &str, value: u64) {
        {
            let gauges = self.gauges.read().await;
            if let Some(gauge) = gauges.get(name) {
                gauge.store(value, Ordering::Relaxed);
                return;
            }
        }

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a latency observation in seconds.
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        {
            let histograms = self.histograms.read().await;
            if let Some(histogram) = histograms.get(name) {
                histogram.observe(value);
                return;
            }
        }

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(value);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot all metrics as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let counter_values: HashMap<String, u64> = counters
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let gauge_values: HashMap<String, u64> = gauges
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let histogram_values: HashMap<String, serde_json::Value> = histograms
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    /// Export metrics in Prometheus text format.
    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();

        output.push_str("# HELP engagement_uptime_seconds Time since process start\n");
        output.push_str("# TYPE engagement_uptime_seconds gauge\n");
        output.push_str(&format!(
            "engagement_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        for (name, counter) in counters.iter() {
            let prometheus_name = name.replace(['.', '-'], "_");
            output.push_str(&format!("# TYPE {} counter\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                counter.load(Ordering::Relaxed)
            ));
        }

        for (name, gauge) in gauges.iter() {
            let prometheus_name = name.replace(['.', '-'], "_");
            output.push_str(&format!("# TYPE {} gauge\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                gauge.load(Ordering::Relaxed)
            ));
        }

        for (name, histogram) in histograms.iter() {
            output.push_str(&histogram.to_prometheus(name));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum of observations, stored with millisecond precision.
    sum_millis: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_millis: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_millis
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, bucket) in self.buckets.iter().enumerate() {
            if value <= *bucket {
                self.counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let bucket_counts: Vec<u64> = self
            .counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": bucket_counts,
            "sum": self.sum_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            "count": self.count.load(Ordering::Relaxed),
        })
    }

    pub fn to_prometheus(&self, name: &str) -> String {
        let prometheus_name = name.replace(['.', '-'], "_");
        let mut output = String::new();

        output.push_str(&format!("# TYPE {} histogram\n", prometheus_name));

        let mut cumulative = 0u64;
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                prometheus_name, bucket, cumulative
            ));
        }

        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            prometheus_name,
            self.sum_millis.load(Ordering::Relaxed) as f64 / 1000.0
        ));
        output.push_str(&format!(
            "{}_count {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Latency buckets in seconds
        Self::new(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ])
    }
}

/// Time an async operation into a histogram.
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter() {
        let registry = MetricsRegistry::new();

        registry.inc_counter(metric_names::EVENTS_APPLIED).await;
        registry.inc_counter(metric_names::EVENTS_APPLIED).await;
        registry.add_counter(metric_names::EVENTS_APPLIED, 5).await;

        assert_eq!(registry.get_counter(metric_names::EVENTS_APPLIED).await, 7);
    }

    #[tokio::test]
    async fn test_gauge() {
        let registry = MetricsRegistry::new();

        registry
            .set_gauge(metric_names::PARTITION_WORKERS, 16)
            .await;
        assert_eq!(
            registry.get_gauge(metric_names::PARTITION_WORKERS).await,
            16
        );

        registry.set_gauge(metric_names::PARTITION_WORKERS, 8).await;
        assert_eq!(
            registry.get_gauge(metric_names::PARTITION_WORKERS).await,
            8
        );
    }

    #[tokio::test]
    async fn test_histogram_counts() {
        let registry = MetricsRegistry::new();

        registry
            .observe_histogram(metric_names::APPLY_LATENCY, 0.005)
            .await;
        registry
            .observe_histogram(metric_names::APPLY_LATENCY, 0.05)
            .await;
        registry
            .observe_histogram(metric_names::APPLY_LATENCY, 0.5)
            .await;

        let json = registry.to_json().await;
        let histograms = json.get("histograms").unwrap();
        let latency = histograms.get(metric_names::APPLY_LATENCY).unwrap();
        assert_eq!(latency.get("count").unwrap().as_u64().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_prometheus_format() {
        let registry = MetricsRegistry::new();

        registry.inc_counter("test_counter").await;
        registry.set_gauge("test_gauge", 42).await;

        let prometheus = registry.to_prometheus().await;
        assert!(prometheus.contains("test_counter 1"));
        assert!(prometheus.contains("test_gauge 42"));
    }
}
