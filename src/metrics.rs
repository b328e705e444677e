use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::repo::WriteRoute;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteLabels {
    pub route: Route,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Route {
    Direct,
    SideBranch,
    Bootstrap,
    Failed,
}

impl From<WriteRoute> for Route {
    fn from(route: WriteRoute) -> Self {
        match route {
            WriteRoute::Direct => Route::Direct,
            WriteRoute::SideBranch => Route::SideBranch,
            WriteRoute::Bootstrap => Route::Bootstrap,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerifyLabels {
    pub writable: Writable,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Writable {
    Yes,
    No,
    Unknown,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    // -- writes --
    pub writes_total: Family<WriteLabels, Counter>,
    pub write_duration_seconds: Histogram,

    // -- verification --
    pub verifications_total: Family<VerifyLabels, Counter>,

    // -- remote API --
    pub upstream_api_calls: Family<EndpointLabels, Counter>,
    pub upstream_api_rate_limit_remaining: Gauge,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let writes_total = Family::<WriteLabels, Counter>::default();
        registry.register(
            "codesave_writes",
            "Completed file writes by route, including failures",
            writes_total.clone(),
        );

        let write_duration_seconds = Histogram::new(exponential_buckets(0.05, 2.0, 10));
        registry.register(
            "codesave_write_duration_seconds",
            "End-to-end write latency in seconds, recovery included",
            write_duration_seconds.clone(),
        );

        let verifications_total = Family::<VerifyLabels, Counter>::default();
        registry.register(
            "codesave_verifications",
            "Credential verifications by reported write access",
            verifications_total.clone(),
        );

        let upstream_api_calls = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "codesave_upstream_api_calls",
            "Remote API call count by endpoint",
            upstream_api_calls.clone(),
        );

        let upstream_api_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "codesave_upstream_api_rate_limit_remaining",
            "Remaining remote API calls before rate limit",
            upstream_api_rate_limit_remaining.clone(),
        );

        Self {
            writes_total,
            write_duration_seconds,
            verifications_total,
            upstream_api_calls,
            upstream_api_rate_limit_remaining,
        }
    }

    pub fn record_write(&self, route: Route, elapsed_secs: f64) {
        self.writes_total.get_or_create(&WriteLabels { route }).inc();
        self.write_duration_seconds.observe(elapsed_secs);
    }

    pub fn record_api_call(&self, endpoint: &str) {
        self.upstream_api_calls
            .get_or_create(&EndpointLabels {
                endpoint: endpoint.to_string(),
            })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// OpenMetrics text exposition of the whole registry.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
