//! Instrumentation sink for client calls.
//!
//! Every client registers three instruments under `client_<kind>.<name>`:
//!
//! | Suffix   | Instrument | Records |
//! |----------|------------|---------|
//! | `.count` | counter    | one per dispatched call |
//! | `.time`  | histogram  | wall time of the whole call in milliseconds, retries included |
//! | `.retry` | histogram  | attempts made by the call |
//!
//! Sinks are shared by every in-flight call and must accept concurrent updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use courier_types::ClientKind;

pub trait Counter: Send + Sync {
    fn add(&self, value: u64);
}

pub trait Histogram: Send + Sync {
    fn record(&self, value: u64);
}

/// Metrics backend that creates (or returns existing) instruments by name.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &str) -> Arc<dyn Counter>;

    fn histogram(&self, name: &str) -> Arc<dyn Histogram>;
}

/// The three instruments owned by one client.
#[derive(Clone)]
pub struct Instruments {
    calls: Arc<dyn Counter>,
    time: Arc<dyn Histogram>,
    retries: Arc<dyn Histogram>,
}

impl Instruments {
    pub fn register(sink: &dyn MetricsSink, kind: ClientKind, client_name: &str) -> Self {
        let prefix = kind.instrument_prefix(client_name);
        Self {
            calls: sink.counter(&format!("{prefix}.count")),
            time: sink.histogram(&format!("{prefix}.time")),
            retries: sink.histogram(&format!("{prefix}.retry")),
        }
    }

    pub fn record_call(&self) {
        self.calls.add(1);
    }

    pub fn record_time_ms(&self, millis: u64) {
        self.time.record(millis);
    }

    pub fn record_retries(&self, attempts: u32) {
        self.retries.record(u64::from(attempts));
    }
}

impl std::fmt::Debug for Instruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruments").finish_non_exhaustive()
    }
}

// ============================================================================
// No-op sink
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

struct Noop;

impl Counter for Noop {
    fn add(&self, _value: u64) {}
}

impl Histogram for Noop {
    fn record(&self, _value: u64) {}
}

impl MetricsSink for NoopMetrics {
    fn counter(&self, _name: &str) -> Arc<dyn Counter> {
        Arc::new(Noop)
    }

    fn histogram(&self, _name: &str) -> Arc<dyn Histogram> {
        Arc::new(Noop)
    }
}

// ============================================================================
// In-memory sink
// ============================================================================

#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Counter for AtomicCounter {
    fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }
}

/// Lock-free summary histogram: count, sum, min and max.
#[derive(Debug)]
pub struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for AtomicHistogram {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl AtomicHistogram {
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min: if count == 0 { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

impl Histogram for AtomicHistogram {
    fn record(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }
}

/// Process-wide registry of atomic instruments.
///
/// Registration takes a lock; recording never does.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, Arc<AtomicCounter>>>,
    histograms: Mutex<HashMap<String, Arc<AtomicHistogram>>>,
}

impl InMemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|counter| counter.value())
    }

    #[must_use]
    pub fn histogram_snapshot(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|histogram| histogram.snapshot())
    }

    /// Names of every registered instrument, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.extend(
            self.histograms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        names.sort();
        names
    }
}

impl MetricsSink for InMemoryMetrics {
    fn counter(&self, name: &str) -> Arc<dyn Counter> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let counter = counters.entry(name.to_string()).or_default();
        Arc::clone(counter) as Arc<dyn Counter>
    }

    fn histogram(&self, name: &str) -> Arc<dyn Histogram> {
        let mut histograms = self
            .histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let histogram = histograms.entry(name.to_string()).or_default();
        Arc::clone(histogram) as Arc<dyn Histogram>
    }
}

// ============================================================================
// OpenTelemetry sink
// ============================================================================

#[cfg(feature = "otel-metrics")]
pub use otel::OtelMetrics;

#[cfg(feature = "otel-metrics")]
mod otel {
    use std::sync::Arc;

    use opentelemetry::metrics::Meter;

    use super::{Counter, Histogram, MetricsSink};

    /// Sink backed by an OpenTelemetry meter (the global one by default).
    #[derive(Debug, Clone)]
    pub struct OtelMetrics {
        meter: Meter,
    }

    impl OtelMetrics {
        #[must_use]
        pub fn new(meter: Meter) -> Self {
            Self { meter }
        }

        #[must_use]
        pub fn global() -> Self {
            Self::new(opentelemetry::global::meter("courier"))
        }
    }

    struct OtelCounter(opentelemetry::metrics::Counter<u64>);

    impl Counter for OtelCounter {
        fn add(&self, value: u64) {
            self.0.add(value, &[]);
        }
    }

    struct OtelHistogram(opentelemetry::metrics::Histogram<u64>);

    impl Histogram for OtelHistogram {
        fn record(&self, value: u64) {
            self.0.record(value, &[]);
        }
    }

    impl MetricsSink for OtelMetrics {
        fn counter(&self, name: &str) -> Arc<dyn Counter> {
            Arc::new(OtelCounter(self.meter.u64_counter(name.to_string()).init()))
        }

        fn histogram(&self, name: &str) -> Arc<dyn Histogram> {
            Arc::new(OtelHistogram(self.meter.u64_histogram(name.to_string()).init()))
        }
    }

    #[cfg(test)]
    mod tests {
        use opentelemetry::metrics::MeterProvider as _;
        use opentelemetry::metrics::noop::NoopMeterProvider;

        use super::*;
        use crate::metrics::Instruments;
        use courier_types::ClientKind;

        fn noop_metrics() -> OtelMetrics {
            OtelMetrics::new(NoopMeterProvider::new().meter("courier-test"))
        }

        #[test]
        fn registers_and_records_through_meter() {
            let metrics = noop_metrics();
            let instruments = Instruments::register(&metrics, ClientKind::Http, "billing");

            instruments.record_call();
            instruments.record_time_ms(42);
            instruments.record_retries(3);
        }

        #[test]
        fn instruments_are_usable_behind_the_sink_trait() {
            let sink: Arc<dyn MetricsSink> = Arc::new(noop_metrics());

            sink.counter("client_http.billing.count").add(1);
            sink.histogram("client_http.billing.time").record(7);
            sink.histogram("client_http.billing.retry").record(1);
        }
    }
}
