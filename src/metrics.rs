//! Concrete metrics surface (spec §4.1's "Metrics surface" component, §6).
//!
//! Grounded in `kimberlite-vsr`'s `instrumentation.rs` atomic-counter style
//! rather than the teacher's `watch::channel`-pushed `RaftMetrics` snapshot:
//! the per-replicator numbers named in spec §6 (lag, next_index, RPC
//! latencies) are naturally read-many/write-one counters and gauges, not a
//! whole-struct snapshot broadcast. `ReplicatorMetrics` is the default
//! [`crate::collaborators::MetricsRegistry`] implementation; embedders may
//! supply their own to bridge into `metrics`-crate-style exporters instead.
//!
//! Names are registered lazily: the replicator names its own per-peer gauges
//! as `replicator-<group>/<peer>/next-index` (spec §5), one distinct name per
//! live replicator, so handles are allocated on first use and reused after
//! (duplicate registration tolerated, per spec §5) rather than declared as a
//! fixed struct field per metric the way a single-node `RaftMetrics` would.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::collaborators::CounterHandle;
use crate::collaborators::CounterHandleImpl;
use crate::collaborators::GaugeHandle;
use crate::collaborators::GaugeHandleImpl;
use crate::collaborators::HistogramHandle;
use crate::collaborators::HistogramHandleImpl;
use crate::collaborators::MetricsRegistry;

/// An `AtomicU64`-backed gauge.
#[derive(Default)]
struct AtomicGauge(AtomicU64);

impl GaugeHandleImpl for AtomicGauge {
    fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

/// An `AtomicU64`-backed counter.
#[derive(Default)]
struct AtomicCounter(AtomicU64);

impl CounterHandleImpl for AtomicCounter {
    fn increment(&self, by: u64) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }
}

/// A count+sum latency accumulator; `mean_ns` divides the two for reporting.
#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum_ns: AtomicU64,
}

impl HistogramHandleImpl for AtomicHistogram {
    fn record(&self, value_ns: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(value_ns, Ordering::Relaxed);
    }
}

impl AtomicHistogram {
    fn mean_ns(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.sum_ns.load(Ordering::Relaxed) / count
        }
    }
}

/// The default [`MetricsRegistry`]: lazily-allocated, name-keyed atomic
/// handles. Thread-safe and cheap to share across every replicator in a
/// process, the way the log store or ballot box are shared (spec §4.1's
/// "Shared resources" paragraph).
#[derive(Default)]
pub struct ReplicatorMetrics {
    gauges: Mutex<HashMap<String, Arc<AtomicGauge>>>,
    counters: Mutex<HashMap<String, Arc<AtomicCounter>>>,
    histograms: Mutex<HashMap<String, Arc<AtomicHistogram>>>,
}

impl ReplicatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back the current mean of a recorded histogram, in nanoseconds.
    /// Returns `0` if the name has never been recorded. Exposed for tests and
    /// embedders bridging into their own exporter on a polling cadence.
    pub fn histogram_mean_ns(&self, name: &str) -> u64 {
        self.histograms.lock().expect("metrics mutex poisoned").get(name).map(|h| h.mean_ns()).unwrap_or(0)
    }
}

impl MetricsRegistry for ReplicatorMetrics {
    fn gauge(&self, name: &str) -> GaugeHandle {
        self.gauges.lock().expect("metrics mutex poisoned").entry(name.to_string()).or_insert_with(|| Arc::new(AtomicGauge::default())).clone()
    }

    fn counter(&self, name: &str) -> CounterHandle {
        self.counters.lock().expect("metrics mutex poisoned").entry(name.to_string()).or_insert_with(|| Arc::new(AtomicCounter::default())).clone()
    }

    fn histogram(&self, name: &str) -> HistogramHandle {
        self.histograms.lock().expect("metrics mutex poisoned").entry(name.to_string()).or_insert_with(|| Arc::new(AtomicHistogram::default())).clone()
    }
}
