//! Request latency histogram.
//!
//! The logging transport reports one observation per logical call, labeled
//! with the request method, the response status (or `-1` for a transport
//! error) and the target host.
//!
//! ```rust
//! use layered_http::metrics::LatencyHistogram;
//!
//! let histogram = LatencyHistogram::new("http_client_request_latency");
//! histogram.observe_call(12.5, "GET", "200", "example.com");
//!
//! let (count, sum) = histogram.count_and_sum("GET", "200", "example.com");
//! assert_eq!(count, 1);
//! assert_eq!(sum, 12.5);
//! println!("{}", histogram.export_prometheus());
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Metric name of the process-wide request latency histogram.
pub const REQUEST_LATENCY_METRIC: &str = "http_client_request_latency";

/// Status label used when the call failed without a response.
pub const TRANSPORT_ERROR_STATUS: &str = "-1";

/// Sink for per-call latency observations, in milliseconds.
pub trait LatencyObserver: Send + Sync {
    fn observe(&self, millis: f64, method: &str, status: &str, host: &str);
}

type LabelKey = (String, String, String);

/// In-process histogram of call latencies keyed by `(method, status, host)`.
pub struct LatencyHistogram {
    name: &'static str,
    bounds: Vec<f64>,
    series: RwLock<BTreeMap<LabelKey, Series>>,
}

#[derive(Clone, Debug, Default)]
struct Series {
    count: u64,
    sum: f64,
    buckets: Vec<u64>,
}

impl LatencyHistogram {
    /// Default bucket upper bounds, in milliseconds.
    pub const DEFAULT_BUCKETS: &'static [f64] = &[
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
    ];

    pub fn new(name: &'static str) -> Self {
        Self::with_buckets(name, Self::DEFAULT_BUCKETS.to_vec())
    }

    pub fn with_buckets(name: &'static str, mut bounds: Vec<f64>) -> Self {
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        Self {
            name,
            bounds,
            series: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn observe_call(&self, millis: f64, method: &str, status: &str, host: &str) {
        let key = (method.to_owned(), status.to_owned(), host.to_owned());
        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        let entry = series.entry(key).or_insert_with(|| Series {
            buckets: vec![0; self.bounds.len()],
            ..Series::default()
        });

        entry.count += 1;
        entry.sum += millis;
        for (upper_bound, count) in self.bounds.iter().zip(entry.buckets.iter_mut()) {
            if millis <= *upper_bound {
                *count += 1;
            }
        }
    }

    /// Observation count and latency sum for one label set.
    pub fn count_and_sum(&self, method: &str, status: &str, host: &str) -> (u64, f64) {
        let key = (method.to_owned(), status.to_owned(), host.to_owned());
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series
            .get(&key)
            .map(|entry| (entry.count, entry.sum))
            .unwrap_or((0, 0.0))
    }

    /// Total observations across every label set.
    pub fn total_count(&self) -> u64 {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series.values().map(|entry| entry.count).sum()
    }

    /// Renders every series in the Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        let mut output = String::new();
        let _ = writeln!(output, "# TYPE {} histogram", self.name);

        for ((method, status, host), entry) in series.iter() {
            let labels = format!(
                "http_client_method=\"{method}\",http_client_status=\"{status}\",http_client_host=\"{host}\""
            );
            for (upper_bound, count) in self.bounds.iter().zip(entry.buckets.iter()) {
                let _ = writeln!(
                    output,
                    "{}_bucket{{{labels},le=\"{upper_bound}\"}} {count}",
                    self.name
                );
            }
            let _ = writeln!(
                output,
                "{}_bucket{{{labels},le=\"+Inf\"}} {}",
                self.name, entry.count
            );
            let _ = writeln!(output, "{}_sum{{{labels}}} {}", self.name, entry.sum);
            let _ = writeln!(output, "{}_count{{{labels}}} {}", self.name, entry.count);
        }

        output
    }
}

impl LatencyObserver for LatencyHistogram {
    fn observe(&self, millis: f64, method: &str, status: &str, host: &str) {
        self.observe_call(millis, method, status, host);
    }
}

/// Process-wide histogram used by transports that were not given their own observer.
pub fn request_latency_histogram() -> Arc<LatencyHistogram> {
    static HISTOGRAM: OnceLock<Arc<LatencyHistogram>> = OnceLock::new();
    Arc::clone(HISTOGRAM.get_or_init(|| Arc::new(LatencyHistogram::new(REQUEST_LATENCY_METRIC))))
}

#[cfg(test)]
mod tests {
    use super::{LatencyHistogram, LatencyObserver};

    #[test]
    fn observations_are_bucketed_per_label_set() {
        let histogram = LatencyHistogram::with_buckets("test_latency", vec![100.0, 10.0, 50.0]);
        histogram.observe(5.0, "GET", "200", "a");
        histogram.observe(60.0, "GET", "200", "a");
        histogram.observe(200.0, "POST", "-1", "b");

        assert_eq!(histogram.count_and_sum("GET", "200", "a"), (2, 65.0));
        assert_eq!(histogram.count_and_sum("POST", "-1", "b"), (1, 200.0));
        assert_eq!(histogram.count_and_sum("PUT", "200", "a"), (0, 0.0));
        assert_eq!(histogram.total_count(), 3);

        let exported = histogram.export_prometheus();
        assert!(exported.starts_with("# TYPE test_latency histogram"));
        assert!(exported.contains(
            "test_latency_bucket{http_client_method=\"GET\",http_client_status=\"200\",http_client_host=\"a\",le=\"10\"} 1"
        ));
        assert!(exported.contains(
            "test_latency_bucket{http_client_method=\"GET\",http_client_status=\"200\",http_client_host=\"a\",le=\"100\"} 2"
        ));
        assert!(exported.contains(
            "test_latency_count{http_client_method=\"POST\",http_client_status=\"-1\",http_client_host=\"b\"} 1"
        ));
    }
}
