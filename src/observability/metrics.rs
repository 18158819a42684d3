use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub deliveries_created_total: IntCounter,
    pub delivery_transitions_total: IntCounterVec,
    pub offers_sent_total: IntCounter,
    pub claims_total: IntCounterVec,
    pub dispatch_attempts_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub presence_stale_evictions_total: IntCounter,
    pub presence_entries: IntGauge,
    pub connected_parties: IntGaugeVec,
    pub ingest_events_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let deliveries_created_total =
            IntCounter::new("deliveries_created_total", "Deliveries created from new orders")
                .expect("valid deliveries_created_total metric");

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Applied delivery status transitions by target status",
            ),
            &["status"],
        )
        .expect("valid delivery_transitions_total metric");

        let offers_sent_total =
            IntCounter::new("offers_sent_total", "Job offers pushed to courier channels")
                .expect("valid offers_sent_total metric");

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let dispatch_attempts_total = IntCounterVec::new(
            Opts::new("dispatch_attempts_total", "Assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_attempts_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of matching and offer fan-out in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let presence_stale_evictions_total = IntCounter::new(
            "presence_stale_evictions_total",
            "Geo entries evicted at lookup because their liveness marker expired",
        )
        .expect("valid presence_stale_evictions_total metric");

        let presence_entries = IntGauge::new("presence_entries", "Couriers in the geo index")
            .expect("valid presence_entries metric");

        let connected_parties = IntGaugeVec::new(
            Opts::new("connected_parties", "Live channels by role"),
            &["role"],
        )
        .expect("valid connected_parties metric");

        let ingest_events_total = IntCounterVec::new(
            Opts::new("ingest_events_total", "Consumed order events by kind and outcome"),
            &["kind", "outcome"],
        )
        .expect("valid ingest_events_total metric");

        registry
            .register(Box::new(deliveries_created_total.clone()))
            .expect("register deliveries_created_total");
        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(offers_sent_total.clone()))
            .expect("register offers_sent_total");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(dispatch_attempts_total.clone()))
            .expect("register dispatch_attempts_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(presence_stale_evictions_total.clone()))
            .expect("register presence_stale_evictions_total");
        registry
            .register(Box::new(presence_entries.clone()))
            .expect("register presence_entries");
        registry
            .register(Box::new(connected_parties.clone()))
            .expect("register connected_parties");
        registry
            .register(Box::new(ingest_events_total.clone()))
            .expect("register ingest_events_total");

        Self {
            registry,
            deliveries_created_total,
            delivery_transitions_total,
            offers_sent_total,
            claims_total,
            dispatch_attempts_total,
            dispatch_latency_seconds,
            presence_stale_evictions_total,
            presence_entries,
            connected_parties,
            ingest_events_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
