//! Telemetry sink abstraction and its Prometheus-backed implementation.
//!
//! Call sites emit events by dotted key (e.g. `beacon_kit.execution.engine.new_payload_valid`)
//! with free-form string labels. The [`PrometheusSink`] lazily registers one counter or
//! histogram family per key the first time it is used; the label names seen on that first
//! use become the family's label set.

use std::{collections::HashMap, fmt, time::Instant};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::*;

lazy_static! {
    /// Global registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();
}

/// Buckets for call duration histograms, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Destination for counters and timers emitted by the engine client.
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    /// Increments the counter identified by `key`.
    fn increment_counter(&self, key: &str, labels: &[(&str, &str)]);

    /// Observes the time elapsed since `start` under `key`.
    fn measure_since(&self, key: &str, start: Instant, labels: &[(&str, &str)]);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn increment_counter(&self, _key: &str, _labels: &[(&str, &str)]) {}

    fn measure_since(&self, _key: &str, _start: Instant, _labels: &[(&str, &str)]) {}
}

/// Converts a dotted key into a valid Prometheus metric name.
pub fn metric_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// [`TelemetrySink`] backed by a Prometheus [`Registry`].
pub struct PrometheusSink {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusSink")
            .field("counters", &self.counters.lock().len())
            .field("histograms", &self.histograms.lock().len())
            .finish()
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new(REGISTRY.clone())
    }
}

impl PrometheusSink {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every registered family in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn counter_family(&self, key: &str, label_names: &[&str]) -> Option<IntCounterVec> {
        let mut counters = self.counters.lock();
        if let Some(vec) = counters.get(key) {
            return Some(vec.clone());
        }

        let name = metric_name(key);
        let vec = match IntCounterVec::new(Opts::new(name.clone(), key.to_string()), label_names)
        {
            Ok(vec) => vec,
            Err(err) => {
                warn!(%key, %err, "failed to create counter");
                return None;
            }
        };
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(%key, %err, "failed to register counter");
        }
        counters.insert(key.to_string(), vec.clone());
        Some(vec)
    }

    fn histogram_family(&self, key: &str, label_names: &[&str]) -> Option<HistogramVec> {
        let mut histograms = self.histograms.lock();
        if let Some(vec) = histograms.get(key) {
            return Some(vec.clone());
        }

        let name = format!("{}_seconds", metric_name(key));
        let opts = HistogramOpts::new(name, key.to_string()).buckets(DURATION_BUCKETS.to_vec());
        let vec = match HistogramVec::new(opts, label_names) {
            Ok(vec) => vec,
            Err(err) => {
                warn!(%key, %err, "failed to create histogram");
                return None;
            }
        };
        if let Err(err) = self.registry.register(Box::new(vec.clone())) {
            warn!(%key, %err, "failed to register histogram");
        }
        histograms.insert(key.to_string(), vec.clone());
        Some(vec)
    }
}

fn split_labels<'a>(labels: &'a [(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    labels.iter().copied().unzip()
}

impl TelemetrySink for PrometheusSink {
    fn increment_counter(&self, key: &str, labels: &[(&str, &str)]) {
        let (names, values) = split_labels(labels);
        let Some(family) = self.counter_family(key, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(counter) => counter.inc(),
            Err(err) => debug!(%key, %err, "dropping counter with mismatched labels"),
        }
    }

    fn measure_since(&self, key: &str, start: Instant, labels: &[(&str, &str)]) {
        let (names, values) = split_labels(labels);
        let Some(family) = self.histogram_family(key, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(hist) => hist.observe(start.elapsed().as_secs_f64()),
            Err(err) => debug!(%key, %err, "dropping timer with mismatched labels"),
        }
    }
}

/// In-memory sink that records every event, for assertions in tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingSink {
    counters: Mutex<Vec<(String, Vec<(String, String)>)>>,
    timers: Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the counter `key` was incremented.
    pub fn count(&self, key: &str) -> usize {
        self.counters.lock().iter().filter(|(k, _)| k == key).count()
    }

    /// Total number of counter increments across all keys.
    pub fn total_counts(&self) -> usize {
        self.counters.lock().len()
    }

    /// Labels attached to the most recent increment of `key`.
    pub fn last_labels(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.counters
            .lock()
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, labels)| labels.clone())
    }

    /// Number of timer observations under `key`.
    pub fn timings(&self, key: &str) -> usize {
        self.timers.lock().iter().filter(|k| *k == key).count()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl TelemetrySink for RecordingSink {
    fn increment_counter(&self, key: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.counters.lock().push((key.to_string(), labels));
    }

    fn measure_since(&self, key: &str, _start: Instant, _labels: &[(&str, &str)]) {
        self.timers.lock().push(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name_sanitizes_dots() {
        assert_eq!(
            metric_name("beacon_kit.execution.engine.new_payload"),
            "beacon_kit_execution_engine_new_payload"
        );
        assert_eq!(metric_name("a-b c"), "a_b_c");
    }

    #[test]
    fn test_prometheus_sink_counts() {
        let sink = PrometheusSink::new(Registry::new());
        sink.increment_counter("engine.calls", &[("method", "new_payload")]);
        sink.increment_counter("engine.calls", &[("method", "new_payload")]);
        sink.increment_counter("engine.calls", &[("method", "get_payload")]);

        let family = sink.counter_family("engine.calls", &["method"]).unwrap();
        assert_eq!(family.with_label_values(&["new_payload"]).get(), 2);
        assert_eq!(family.with_label_values(&["get_payload"]).get(), 1);

        let text = sink.encode_text().unwrap();
        assert!(text.contains("engine_calls{method=\"new_payload\"} 2"));
    }

    #[test]
    fn test_prometheus_sink_ignores_mismatched_labels() {
        let sink = PrometheusSink::new(Registry::new());
        sink.increment_counter("engine.calls", &[("method", "new_payload")]);
        // Different label arity is dropped rather than panicking.
        sink.increment_counter("engine.calls", &[("method", "x"), ("extra", "y")]);

        let family = sink.counter_family("engine.calls", &["method"]).unwrap();
        assert_eq!(family.with_label_values(&["new_payload"]).get(), 1);
    }

    #[test]
    fn test_prometheus_sink_measures() {
        let sink = PrometheusSink::new(Registry::new());
        sink.measure_since("engine.duration", Instant::now(), &[]);
        let text = sink.encode_text().unwrap();
        assert!(text.contains("engine_duration_seconds_count 1"));
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.increment_counter("a", &[("k", "v")]);
        sink.increment_counter("a", &[]);
        sink.increment_counter("b", &[]);
        sink.measure_since("t", Instant::now(), &[]);

        assert_eq!(sink.count("a"), 2);
        assert_eq!(sink.count("b"), 1);
        assert_eq!(sink.total_counts(), 3);
        assert_eq!(sink.last_labels("a"), Some(vec![]));
        assert_eq!(sink.timings("t"), 1);
    }
}
