// SPDX-License-Identifier: Apache-2.0
//! Prometheus metrics for the reconciliation agent.

use key_keeper_resource::PassSummary;
use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global metrics registry singleton.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Prometheus metrics for the agent.
pub struct Metrics {
    registry: Registry,

    // Reconciliation metrics
    pub reconcile_total: CounterVec,
    pub pass_duration_seconds: HistogramVec,
    pub trigger_total: CounterVec,

    // Discovery metrics
    pub discovery_total: CounterVec,

    // Inventory
    pub issuers: Gauge,
    pub resources: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        // Reconciliation metrics
        let reconcile_total = CounterVec::new(
            Opts::new(
                "keeper_reconcile_total",
                "Reconciliation units by resource kind and outcome",
            ),
            &["kind", "outcome"],
        )
        .expect("metric can be created");

        let pass_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "keeper_pass_duration_seconds",
                "Duration of a full reconciliation pass in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["issuer"],
        )
        .expect("metric can be created");

        let trigger_total = CounterVec::new(
            Opts::new("keeper_trigger_total", "Trigger commands by result"),
            &["result"],
        )
        .expect("metric can be created");

        // Discovery metrics
        let discovery_total = CounterVec::new(
            Opts::new("keeper_discovery_total", "Configuration discovery passes by result"),
            &["result"],
        )
        .expect("metric can be created");

        // Inventory
        let issuers = Gauge::with_opts(Opts::new("keeper_issuers", "Number of connected issuers"))
            .expect("metric can be created");

        let resources = Gauge::with_opts(Opts::new(
            "keeper_resources",
            "Number of declarations across all issuers",
        ))
        .expect("metric can be created");

        // Register all metrics
        registry
            .register(Box::new(reconcile_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(pass_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(trigger_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(discovery_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(issuers.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(resources.clone()))
            .expect("metric can be registered");

        Self {
            registry,
            reconcile_total,
            pass_duration_seconds,
            trigger_total,
            discovery_total,
            issuers,
            resources,
        }
    }

    /// Count every unit of a finished pass.
    pub fn record_pass(&self, summary: &PassSummary) {
        for report in &summary.reports {
            self.reconcile_total
                .with_label_values(&[report.kind.as_str(), report.outcome.as_str()])
                .inc();
        }
        let triggers = summary.triggers();
        self.trigger_total
            .with_label_values(&["success"])
            .inc_by(triggers.succeeded as f64);
        self.trigger_total
            .with_label_values(&["failure"])
            .inc_by(triggers.failed as f64);
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }
}

/// Helper to record how long an issuer's pass took.
pub struct PassTimer {
    issuer: String,
    start: std::time::Instant,
}

impl PassTimer {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self, summary: &PassSummary) {
        let duration = self.start.elapsed().as_secs_f64();
        metrics()
            .pass_duration_seconds
            .with_label_values(&[&self.issuer])
            .observe(duration);
        metrics().record_pass(summary);
    }
}
