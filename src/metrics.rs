//! Service counters and latency tracking for the classification service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector shared by the request path and the monitor worker
pub struct ServiceMetrics {
    /// Successful predictions
    pub predictions: AtomicU64,
    /// Requests rejected by the auth gate
    pub auth_failures: AtomicU64,
    /// Predictions that failed inside the model
    pub prediction_failures: AtomicU64,
    /// Successful model swaps
    pub reloads: AtomicU64,
    /// Failed reload attempts
    pub reload_failures: AtomicU64,
    /// Records handed to the ingestion buffer
    pub records_collected: AtomicU64,
    /// Batches detached from the buffer
    pub batches_flushed: AtomicU64,
    /// Rows written to the durable log
    pub rows_logged: AtomicU64,
    /// Batches dropped after the log write retry failed
    pub flushes_dropped: AtomicU64,
    /// Completed drift analyses
    pub drift_runs: AtomicU64,
    /// Analyses that flagged dataset drift
    pub drift_detected: AtomicU64,
    /// Analyses or publications that failed
    pub analysis_failures: AtomicU64,
    /// Predictions per category
    categories: RwLock<HashMap<String, u64>>,
    /// Prediction latencies (in microseconds)
    latencies: RwLock<Vec<u64>>,
    start_time: Instant,
}

impl ServiceMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            predictions: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            prediction_failures: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
            records_collected: AtomicU64::new(0),
            batches_flushed: AtomicU64::new(0),
            rows_logged: AtomicU64::new(0),
            flushes_dropped: AtomicU64::new(0),
            drift_runs: AtomicU64::new(0),
            drift_detected: AtomicU64::new(0),
            analysis_failures: AtomicU64::new(0),
            categories: RwLock::new(HashMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record a served prediction
    pub fn record_prediction(&self, category: &str, latency: Duration) {
        self.predictions.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        if let Ok(mut categories) = self.categories.write() {
            *categories.entry(category.to_string()).or_insert(0) += 1;
        }
    }

    /// Increment a counter
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Latency percentiles over the retained samples
    pub fn get_latency_stats(&self) -> LatencyStats {
        let times = match self.latencies.read() {
            Ok(times) => times,
            Err(_) => return LatencyStats::default(),
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Prediction counts per category
    pub fn get_category_counts(&self) -> HashMap<String, u64> {
        self.categories
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Predictions per second since startup
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            Self::get(&self.predictions) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log a summary of every counter
    pub fn print_summary(&self) {
        let latency = self.get_latency_stats();

        info!(
            predictions = Self::get(&self.predictions),
            throughput = format!("{:.2}/s", self.get_throughput()),
            auth_failures = Self::get(&self.auth_failures),
            prediction_failures = Self::get(&self.prediction_failures),
            reloads = Self::get(&self.reloads),
            reload_failures = Self::get(&self.reload_failures),
            "Request summary"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Prediction latency"
        );
        info!(
            collected = Self::get(&self.records_collected),
            flushed_batches = Self::get(&self.batches_flushed),
            rows_logged = Self::get(&self.rows_logged),
            dropped_batches = Self::get(&self.flushes_dropped),
            drift_runs = Self::get(&self.drift_runs),
            drift_detected = Self::get(&self.drift_detected),
            analysis_failures = Self::get(&self.analysis_failures),
            "Monitoring summary"
        );

        let mut categories: Vec<_> = self.get_category_counts().into_iter().collect();
        categories.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (category, count) in categories {
            info!(category = %category, count = count, "Predictions by category");
        }
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Logs a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new reporter logging every `interval_secs` seconds
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Report until the task is dropped
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_recording() {
        let metrics = ServiceMetrics::new();

        metrics.record_prediction("Loan", Duration::from_micros(100));
        metrics.record_prediction("Loan", Duration::from_micros(300));
        metrics.record_prediction("Credit card", Duration::from_micros(200));
        ServiceMetrics::incr(&metrics.auth_failures);

        assert_eq!(ServiceMetrics::get(&metrics.predictions), 3);
        assert_eq!(ServiceMetrics::get(&metrics.auth_failures), 1);

        let counts = metrics.get_category_counts();
        assert_eq!(counts["Loan"], 2);
        assert_eq!(counts["Credit card"], 1);
    }

    #[test]
    fn test_latency_stats() {
        let metrics = ServiceMetrics::new();
        assert_eq!(metrics.get_latency_stats(), LatencyStats::default());

        for us in [100, 200, 300, 400] {
            metrics.record_prediction("Loan", Duration::from_micros(us));
        }
        let stats = metrics.get_latency_stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_us, 250);
        assert_eq!(stats.p50_us, 300);
        assert_eq!(stats.max_us, 400);
    }
}
