use crate::error::{Error, Result};
use crate::request::OpClass;
use crate::scheduler::Scheduler;
use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus view of a scheduler's introspection surface.
///
/// Values are pulled from snapshots by [`SchedulerMetrics::update`]; nothing
/// on the request path touches the registry.
#[derive(Clone)]
pub struct SchedulerMetrics {
    pub inserted: IntGauge,
    pub merged: IntGauge,
    pub dispatched: IntGauge,
    pub completed: IntGauge,
    pub queued: IntGauge,
    pub in_flight_latency_ns: Gauge,
    pub pending: GaugeVec,
    pub metadata_available: IntGauge,
    pub metadata_exhausted: IntGauge,
    pub model_base_ns: GaugeVec,
    pub model_slope_ns_per_kib: GaugeVec,
    pub batch_size_highest: GaugeVec,
}

impl SchedulerMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let inserted = IntGauge::new("iosched_requests_inserted", "Requests admitted")?;
        registry.register(Box::new(inserted.clone()))?;

        let merged = IntGauge::new("iosched_requests_merged", "Requests absorbed by merges")?;
        registry.register(Box::new(merged.clone()))?;

        let dispatched = IntGauge::new(
            "iosched_requests_dispatched",
            "Requests dispatched from batch pages",
        )?;
        registry.register(Box::new(dispatched.clone()))?;

        let completed = IntGauge::new("iosched_requests_completed", "Requests completed")?;
        registry.register(Box::new(completed.clone()))?;

        let queued = IntGauge::new(
            "iosched_requests_queued",
            "Requests admitted and not yet completed",
        )?;
        registry.register(Box::new(queued.clone()))?;

        let in_flight_latency_ns = Gauge::new(
            "iosched_in_flight_latency_ns",
            "Predicted latency of requests admitted to batches and not completed",
        )?;
        registry.register(Box::new(in_flight_latency_ns.clone()))?;

        let pending = GaugeVec::new(
            Opts::new("iosched_pending_requests", "Requests held by the scheduler"),
            &["queue"],
        )?;
        registry.register(Box::new(pending.clone()))?;

        let metadata_available = IntGauge::new(
            "iosched_metadata_available",
            "Free per-request metadata records",
        )?;
        registry.register(Box::new(metadata_available.clone()))?;

        let metadata_exhausted = IntGauge::new(
            "iosched_metadata_exhausted",
            "Requests that found the metadata pool empty",
        )?;
        registry.register(Box::new(metadata_exhausted.clone()))?;

        let model_base_ns = GaugeVec::new(
            Opts::new("iosched_model_base_ns", "Predicted latency of a small request"),
            &["class"],
        )?;
        registry.register(Box::new(model_base_ns.clone()))?;

        let model_slope_ns_per_kib = GaugeVec::new(
            Opts::new(
                "iosched_model_slope_ns_per_kib",
                "Additional predicted latency per KiB above the small-request threshold",
            ),
            &["class"],
        )?;
        registry.register(Box::new(model_slope_ns_per_kib.clone()))?;

        let batch_size_highest = GaugeVec::new(
            Opts::new(
                "iosched_batch_size_highest",
                "Largest number of requests of a class admitted by one fill",
            ),
            &["class"],
        )?;
        registry.register(Box::new(batch_size_highest.clone()))?;

        Ok(Self {
            inserted,
            merged,
            dispatched,
            completed,
            queued,
            in_flight_latency_ns,
            pending,
            metadata_available,
            metadata_exhausted,
            model_base_ns,
            model_slope_ns_per_kib,
            batch_size_highest,
        })
    }

    pub fn update(&self, scheduler: &Scheduler) {
        let stats = scheduler.stats();

        self.inserted.set(stats.inserted as i64);
        self.merged.set(stats.merged as i64);
        self.dispatched.set(stats.dispatched as i64);
        self.completed.set(stats.completed as i64);
        self.queued.set(stats.queued() as i64);
        self.in_flight_latency_ns.set(stats.in_flight_latency_ns as f64);
        self.pending
            .with_label_values(&["deadline"])
            .set(stats.pending_deadline as f64);
        self.pending
            .with_label_values(&["batches"])
            .set(stats.pending_batches as f64);
        self.pending
            .with_label_values(&["priority"])
            .set(stats.pending_priority as f64);
        self.metadata_available.set(stats.metadata_available as i64);
        self.metadata_exhausted.set(stats.metadata_exhausted as i64);

        for class in OpClass::ALL {
            let model = scheduler.model_snapshot(class);
            let label = [class.name()];
            self.model_base_ns
                .with_label_values(&label)
                .set(model.base as f64);
            self.model_slope_ns_per_kib
                .with_label_values(&label)
                .set(model.slope as f64);
            self.batch_size_highest
                .with_label_values(&label)
                .set(stats.batch_size_highest[class] as f64);
        }
    }
}

/// Render everything in `registry` in the Prometheus text format.
pub fn gather_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| Error::Metrics(prometheus::Error::Msg(e.to_string())))
}
