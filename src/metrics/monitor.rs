use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;

use prometheus::core::Collector;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::debug;
use tracing::warn;

use super::MetricsSink;
use super::PathCategory;
use crate::Result;

/// Monitor type used when the session id serves as the monitor key
pub const SESSION_ID_MONITOR_TYPE: &str = "SessionId";

/// Monitor type used when a key is given without a type
pub const CUSTOMIZED_MONITOR_TYPE: &str = "CustomizedKey";

const TOTAL: &str = "total";

/// Prometheus-backed [`MetricsSink`].
///
/// Every collector carries `monitor_type`/`monitor_key` const labels, so
/// several clients can share one registry as long as their keys differ.
/// Per-namespace series use the `category` label, `total` holds the
/// aggregate.
pub struct ClientMonitor {
    registry: Registry,

    reads: IntCounterVec,
    writes: IntCounterVec,
    read_bytes: IntCounterVec,
    write_bytes: IntCounterVec,
    read_failures: IntCounterVec,
    write_failures: IntCounterVec,
    read_latency: HistogramVec,
    write_latency: HistogramVec,

    state_change_events: IntCounter,
    data_change_events: IntCounter,

    unregistered: AtomicBool,
}

fn category_label(category: Option<PathCategory>) -> &'static str {
    category.map(|c| c.label()).unwrap_or(TOTAL)
}

impl ClientMonitor {
    /// Creates the collectors and registers them with `registry`.
    ///
    /// # Errors
    /// `Error::Metrics` if a monitor with the same type and key is already
    /// registered; nothing stays registered in that case.
    pub fn register(
        registry: &Registry,
        monitor_type: &str,
        monitor_key: &str,
    ) -> Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace("coord_client")
                .const_label("monitor_type", monitor_type)
                .const_label("monitor_key", monitor_key)
        };
        let latency = |name: &str, help: &str| -> Result<HistogramVec> {
            let opts = HistogramOpts::new(name, help)
                .namespace("coord_client")
                .const_label("monitor_type", monitor_type)
                .const_label("monitor_key", monitor_key)
                .buckets(exponential_buckets(1.0, 2.0, 16)?);
            Ok(HistogramVec::new(opts, &["category"])?)
        };

        let monitor = Self {
            registry: registry.clone(),
            reads: IntCounterVec::new(opts("reads", "Completed reads"), &["category"])?,
            writes: IntCounterVec::new(opts("writes", "Completed writes"), &["category"])?,
            read_bytes: IntCounterVec::new(opts("read_bytes", "Bytes read"), &["category"])?,
            write_bytes: IntCounterVec::new(opts("write_bytes", "Bytes written"), &["category"])?,
            read_failures: IntCounterVec::new(opts("read_failures", "Failed reads"), &["category"])?,
            write_failures: IntCounterVec::new(
                opts("write_failures", "Failed writes"),
                &["category"],
            )?,
            read_latency: latency("read_latency_ms", "Read latency in ms")?,
            write_latency: latency("write_latency_ms", "Write latency in ms")?,
            state_change_events: IntCounter::with_opts(opts(
                "state_change_events",
                "Session state change events delivered",
            ))?,
            data_change_events: IntCounter::with_opts(opts(
                "data_change_events",
                "Data change events delivered",
            ))?,
            unregistered: AtomicBool::new(false),
        };

        for (index, collector) in monitor.collectors().into_iter().enumerate() {
            if let Err(e) = registry.register(collector) {
                for registered in monitor.collectors().into_iter().take(index) {
                    let _ = registry.unregister(registered);
                }
                return Err(e.into());
            }
        }
        debug!(monitor_type, monitor_key, "registered client monitor");
        Ok(monitor)
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.reads.clone()),
            Box::new(self.writes.clone()),
            Box::new(self.read_bytes.clone()),
            Box::new(self.write_bytes.clone()),
            Box::new(self.read_failures.clone()),
            Box::new(self.write_failures.clone()),
            Box::new(self.read_latency.clone()),
            Box::new(self.write_latency.clone()),
            Box::new(self.state_change_events.clone()),
            Box::new(self.data_change_events.clone()),
        ]
    }

    pub fn read_count(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.reads.with_label_values(&[category_label(category)]).get()
    }

    pub fn write_count(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.writes.with_label_values(&[category_label(category)]).get()
    }

    pub fn read_bytes(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.read_bytes.with_label_values(&[category_label(category)]).get()
    }

    pub fn write_bytes(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.write_bytes.with_label_values(&[category_label(category)]).get()
    }

    pub fn read_failures(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.read_failures.with_label_values(&[category_label(category)]).get()
    }

    pub fn write_failures(
        &self,
        category: Option<PathCategory>,
    ) -> u64 {
        self.write_failures.with_label_values(&[category_label(category)]).get()
    }

    pub fn state_change_events(&self) -> u64 {
        self.state_change_events.get()
    }

    pub fn data_change_events(&self) -> u64 {
        self.data_change_events.get()
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered.load(Ordering::SeqCst)
    }

    fn record(
        counters: (&IntCounterVec, &IntCounterVec, &HistogramVec),
        path: &str,
        bytes: usize,
        started: Instant,
    ) {
        let (ops, byte_counter, latency) = counters;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let categories = PathCategory::classify(path);
        let labels = std::iter::once(TOTAL).chain(categories.iter().map(|c| c.label()));
        for label in labels {
            ops.with_label_values(&[label]).inc();
            byte_counter.with_label_values(&[label]).inc_by(bytes as u64);
            latency.with_label_values(&[label]).observe(elapsed_ms);
        }
    }

    fn record_failure(
        counter: &IntCounterVec,
        path: &str,
    ) {
        counter.with_label_values(&[TOTAL]).inc();
        for category in PathCategory::classify(path) {
            counter.with_label_values(&[category.label()]).inc();
        }
    }
}

impl MetricsSink for ClientMonitor {
    fn record_read(
        &self,
        path: &str,
        bytes: usize,
        started: Instant,
    ) {
        Self::record((&self.reads, &self.read_bytes, &self.read_latency), path, bytes, started);
    }

    fn record_write(
        &self,
        path: &str,
        bytes: usize,
        started: Instant,
    ) {
        Self::record(
            (&self.writes, &self.write_bytes, &self.write_latency),
            path,
            bytes,
            started,
        );
    }

    fn record_read_failure(
        &self,
        path: &str,
    ) {
        Self::record_failure(&self.read_failures, path);
    }

    fn record_write_failure(
        &self,
        path: &str,
    ) {
        Self::record_failure(&self.write_failures, path);
    }

    fn increase_state_change_event_counter(&self) {
        self.state_change_events.inc();
    }

    fn increase_data_change_event_counter(&self) {
        self.data_change_events.inc();
    }

    fn unregister(&self) {
        if self.unregistered.swap(true, Ordering::SeqCst) {
            return;
        }
        for collector in self.collectors() {
            if let Err(e) = self.registry.unregister(collector) {
                warn!("failed to unregister client metric: {}", e);
            }
        }
        debug!("unregistered client monitor");
    }
}
