//! Minimal run‑time metrics sink.
//!
//! No exporter is bundled; instead the host process may register a plain
//! callback that receives name/value pairs for every metric update.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use once_cell::sync::OnceCell;
use std::sync::Arc;

pub const WRITE_LOCKS_TOTAL: &str = "readmostly_write_locks_total";
pub const WRITER_PARKS_TOTAL: &str = "readmostly_writer_parks_total";
pub const READS_CANCELLED_TOTAL: &str = "readmostly_reads_cancelled_total";
pub const DEAD_READERS_COLLECTED_TOTAL: &str = "readmostly_dead_readers_collected_total";
pub const REGISTERED_READERS: &str = "readmostly_registered_readers";

/// Signature for external collectors.
pub type StatsCallback = fn(name: &str, value: u64);

static CALLBACK: OnceCell<StatsCallback> = OnceCell::new();

/// Register the collector. Only the first registration wins; returns false otherwise.
pub fn register_stats_callback(cb: StatsCallback) -> bool {
    CALLBACK.set(cb).is_ok()
}

#[inline]
fn forward(key: &Key, value: u64) {
    if let Some(cb) = CALLBACK.get() {
        cb(key.name(), value);
    }
}

/// Forwarding recorder. Uses the callback **if** it was registered.
struct CallbackRecorder;

#[derive(Clone)]
struct CallbackMetric {
    key: Key,
}

impl Recorder for CallbackRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}
    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CallbackMetric { key: key.clone() }))
    }
    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(CallbackMetric { key: key.clone() }))
    }
    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CallbackMetric { key: key.clone() }))
    }
}

impl metrics::CounterFn for CallbackMetric {
    fn increment(&self, value: u64) {
        forward(&self.key, value);
    }
    fn absolute(&self, value: u64) {
        forward(&self.key, value);
    }
}

impl metrics::GaugeFn for CallbackMetric {
    fn set(&self, value: f64) {
        forward(&self.key, value as u64);
    }
    fn increment(&self, value: f64) {
        forward(&self.key, value as u64);
    }
    fn decrement(&self, value: f64) {
        forward(&self.key, value as u64);
    }
}

impl metrics::HistogramFn for CallbackMetric {
    fn record(&self, value: f64) {
        forward(&self.key, value as u64);
    }
}

/// Install exactly **once**. Another recorder already installed by the host is left in place.
pub fn init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if metrics::set_global_recorder(CallbackRecorder).is_err() {
            log::debug!("metrics recorder already installed; keeping the host's");
        }
    });
}
