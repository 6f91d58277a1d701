use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::core::Collector;
use prometheus::proto::{Metric, MetricFamily};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;

/// Metric name plus label set. Labels are kept sorted so equal sets compare equal
/// regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn label_names(&self) -> Vec<&str> {
        self.labels.keys().map(String::as_str).collect()
    }

    fn label_map(&self) -> HashMap<&str, &str> {
        self.labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Named counters and histograms backed by a dedicated prometheus registry.
///
/// Series are created on first use. The label names seen on first use are
/// fixed for that metric name; later calls with a different label set are
/// logged and dropped, never surfaced to the caller.
pub struct MetricsRegistry {
    registry: Registry,
    counters: DashMap<String, IntCounterVec>,
    histograms: DashMap<String, HistogramVec>,
    help: DashMap<String, String>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            counters: DashMap::new(),
            histograms: DashMap::new(),
            help: DashMap::new(),
        }
    }

    /// Help text used when `name` is first created.
    pub fn describe(&self, name: &str, help: &str) {
        self.help.insert(name.to_string(), help.to_string());
    }

    pub fn increment(&self, key: &MetricKey) {
        self.increment_by(key, 1);
    }

    pub fn increment_by(&self, key: &MetricKey, value: u64) {
        let Some(vec) = self.counter_vec(key) else {
            return;
        };
        match vec.get_metric_with(&key.label_map()) {
            Ok(counter) => counter.inc_by(value),
            Err(e) => warn!("Dropping increment for {}: {}", key.name, e),
        }
    }

    pub fn observe(&self, key: &MetricKey, duration: Duration) {
        let Some(vec) = self.histogram_vec(key) else {
            return;
        };
        match vec.get_metric_with(&key.label_map()) {
            Ok(histogram) => histogram.observe(duration.as_secs_f64()),
            Err(e) => warn!("Dropping observation for {}: {}", key.name, e),
        }
    }

    /// Current value of a counter series, 0 if it was never incremented.
    /// Reading never creates the series.
    pub fn counter_value(&self, key: &MetricKey) -> u64 {
        self.counters
            .get(&key.name)
            .and_then(|vec| find_series(&vec.collect(), key))
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    /// Number of observations recorded for a histogram series.
    /// Reading never creates the series.
    pub fn histogram_count(&self, key: &MetricKey) -> u64 {
        self.histograms
            .get(&key.name)
            .and_then(|vec| find_series(&vec.collect(), key))
            .map(|metric| metric.get_histogram().get_sample_count())
            .unwrap_or(0)
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition of every series in this registry.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn help_for(&self, name: &str) -> String {
        self.help
            .get(name)
            .map(|h| h.value().clone())
            .unwrap_or_else(|| name.to_string())
    }

    fn counter_vec(&self, key: &MetricKey) -> Option<IntCounterVec> {
        if let Some(vec) = self.counters.get(&key.name) {
            return Some(vec.clone());
        }

        match self.counters.entry(key.name.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let opts = Opts::new(key.name.clone(), self.help_for(&key.name));
                let created = IntCounterVec::new(opts, &key.label_names())
                    .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|_| vec));
                match created {
                    Ok(vec) => Some(entry.insert(vec).clone()),
                    Err(e) => {
                        warn!("Failed to register counter {}: {}", key.name, e);
                        None
                    }
                }
            }
        }
    }

    fn histogram_vec(&self, key: &MetricKey) -> Option<HistogramVec> {
        if let Some(vec) = self.histograms.get(&key.name) {
            return Some(vec.clone());
        }

        match self.histograms.entry(key.name.clone()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let opts = HistogramOpts::new(key.name.clone(), self.help_for(&key.name));
                let created = HistogramVec::new(opts, &key.label_names())
                    .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|_| vec));
                match created {
                    Ok(vec) => Some(entry.insert(vec).clone()),
                    Err(e) => {
                        warn!("Failed to register histogram {}: {}", key.name, e);
                        None
                    }
                }
            }
        }
    }
}

fn find_series(families: &[MetricFamily], key: &MetricKey) -> Option<Metric> {
    families
        .iter()
        .flat_map(|family| family.get_metric())
        .find(|metric| {
            let labels = metric.get_label();
            labels.len() == key.labels.len()
                && labels
                    .iter()
                    .all(|pair| key.labels.get(pair.get_name()).map(String::as_str) == Some(pair.get_value()))
        })
        .cloned()
}
