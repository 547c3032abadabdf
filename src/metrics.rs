//! Prometheus-style metrics for the consensus core.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{ConsensusError, Result};

/// A monotonically increasing counter.
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    fn new(name: String, help: String) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Increments by a value.
    pub fn inc_by(&self, v: u64) {
        self.value.fetch_add(v, Ordering::Relaxed);
    }

    /// Gets the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can move in both directions.
pub struct Gauge {
    name: String,
    help: String,
    value: RwLock<f64>,
}

impl Gauge {
    fn new(name: String, help: String) -> Self {
        Self {
            name,
            help,
            value: RwLock::new(0.0),
        }
    }

    /// Sets the gauge value.
    pub fn set(&self, v: f64) {
        *self.value.write() = v;
    }

    /// Increments the gauge.
    pub fn inc(&self) {
        self.add(1.0);
    }

    /// Decrements the gauge.
    pub fn dec(&self) {
        self.add(-1.0);
    }

    /// Adds to the gauge.
    pub fn add(&self, v: f64) {
        *self.value.write() += v;
    }

    /// Gets the current value.
    pub fn get(&self) -> f64 {
        *self.value.read()
    }
}

/// A registry of named metrics.
///
/// Metric names are unique per registry; registering the same name twice
/// fails, which callers treat as fatal at construction time.
pub struct Registry {
    prefix: String,
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
}

impl Registry {
    /// Creates a new registry. `prefix` is prepended to every metric name.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }

    fn taken(&self, name: &str) -> bool {
        self.counters.read().contains_key(name) || self.gauges.read().contains_key(name)
    }

    /// Registers a counter.
    ///
    /// # Errors
    ///
    /// Fails if a metric with the same name is already registered.
    pub fn register_counter(&self, name: &str, help: &str) -> Result<Arc<Counter>> {
        if self.taken(name) {
            return Err(ConsensusError::Metrics(format!(
                "metric already registered: {name}"
            )));
        }
        let counter = Arc::new(Counter::new(self.full_name(name), help.to_string()));
        self.counters
            .write()
            .insert(name.to_string(), counter.clone());
        Ok(counter)
    }

    /// Registers a gauge.
    ///
    /// # Errors
    ///
    /// Fails if a metric with the same name is already registered.
    pub fn register_gauge(&self, name: &str, help: &str) -> Result<Arc<Gauge>> {
        if self.taken(name) {
            return Err(ConsensusError::Metrics(format!(
                "metric already registered: {name}"
            )));
        }
        let gauge = Arc::new(Gauge::new(self.full_name(name), help.to_string()));
        self.gauges.write().insert(name.to_string(), gauge.clone());
        Ok(gauge)
    }

    /// Gets a counter by name.
    pub fn counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.read().get(name).cloned()
    }

    /// Gets a gauge by name.
    pub fn gauge(&self, name: &str) -> Option<Arc<Gauge>> {
        self.gauges.read().get(name).cloned()
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let mut output = String::new();

        for counter in self.counters.read().values() {
            let _ = writeln!(output, "# HELP {} {}", counter.name, counter.help);
            let _ = writeln!(output, "# TYPE {} counter", counter.name);
            let _ = writeln!(output, "{} {}", counter.name, counter.get());
        }

        for gauge in self.gauges.read().values() {
            let _ = writeln!(output, "# HELP {} {}", gauge.name, gauge.help);
            let _ = writeln!(output, "# TYPE {} gauge", gauge.name);
            let _ = writeln!(output, "{} {}", gauge.name, gauge.get());
        }

        output
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new("avalanche")
    }
}

/// The metric series emitted by a consensus instance.
pub struct ConsensusMetrics {
    /// Vertices currently processing.
    pub vtx_processing: Arc<Gauge>,
    /// Vertices accepted so far.
    pub vtx_accepted: Arc<Counter>,
    /// Vertices rejected so far.
    pub vtx_rejected: Arc<Counter>,
    /// Transactions currently processing.
    pub tx_processing: Arc<Gauge>,
    /// Transactions accepted so far.
    pub tx_accepted: Arc<Counter>,
    /// Transactions rejected so far.
    pub tx_rejected: Arc<Counter>,
    /// Poll rounds recorded.
    pub poll_rounds: Arc<Counter>,
}

impl ConsensusMetrics {
    /// Registers the consensus metric set in `registry`.
    ///
    /// # Errors
    ///
    /// Fails if any of the names is already registered; callers treat
    /// that as fatal.
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            vtx_processing: registry
                .register_gauge("vtx_processing", "Number of vertices currently processing")?,
            vtx_accepted: registry.register_counter("vtx_accepted", "Total vertices accepted")?,
            vtx_rejected: registry.register_counter("vtx_rejected", "Total vertices rejected")?,
            tx_processing: registry.register_gauge(
                "tx_processing",
                "Number of transactions currently processing",
            )?,
            tx_accepted: registry.register_counter("tx_accepted", "Total transactions accepted")?,
            tx_rejected: registry.register_counter("tx_rejected", "Total transactions rejected")?,
            poll_rounds: registry.register_counter("poll_rounds", "Total poll rounds recorded")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let registry = Registry::new("test");
        let counter = registry.register_counter("requests", "Total requests").unwrap();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_gauge() {
        let registry = Registry::new("test");
        let gauge = registry.register_gauge("connections", "Active connections").unwrap();

        gauge.set(10.0);
        gauge.inc();
        gauge.dec();
        gauge.add(5.0);
        assert_eq!(gauge.get(), 15.0);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = Registry::new("test");
        registry.register_gauge("vtx_processing", "gauge").unwrap();

        assert!(registry.register_gauge("vtx_processing", "again").is_err());
        assert!(registry.register_counter("vtx_processing", "as counter").is_err());
    }

    #[test]
    fn test_prometheus_export() {
        let registry = Registry::new("test");
        let counter = registry.register_counter("requests", "Total requests").unwrap();
        counter.inc_by(100);

        let gauge = registry.register_gauge("connections", "Active connections").unwrap();
        gauge.set(42.0);

        let output = registry.export();
        assert!(output.contains("# TYPE test_requests counter"));
        assert!(output.contains("test_requests 100"));
        assert!(output.contains("# TYPE test_connections gauge"));
        assert!(output.contains("test_connections 42"));
    }

    #[test]
    fn test_consensus_metrics() {
        let registry = Registry::new("avalanche");
        let metrics = ConsensusMetrics::new(&registry).unwrap();

        metrics.vtx_processing.inc();
        metrics.vtx_accepted.inc();
        metrics.poll_rounds.inc();

        assert_eq!(metrics.vtx_accepted.get(), 1);
        let output = registry.export();
        assert!(output.contains("avalanche_vtx_processing 1"));

        // A second instance over the same registry must fail.
        assert!(ConsensusMetrics::new(&registry).is_err());
    }
}
