//! Metric declarations for ldlsim.
//!
//! Every metric the simulator records is declared once here as a [`Metric`]
//! constant, so names cannot drift between the code that records them and the
//! code that describes them. The `metrics` facade is re-exported; without an
//! installed recorder all recording calls are no-ops.
//!
//! # Example
//!
//! ```rust
//! use ldlsim_metrics::{metric_defs, EndpointLabels};
//!
//! let labels = EndpointLabels::new("AA-BB-CC-DD-EE-FF-00-11", "gateway");
//! metrics::counter!(metric_defs::GATEWAY_DATAGRAMS_SENT.name, &labels.with_kind("pull_data"))
//!     .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use ldlsim_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const FRAMES: Metric = Metric::counter("ldlsim.test.frames")
///     .with_description("Frames seen")
///     .with_unit(Unit::Count)
///     .with_labels(&["endpoint"]);
///
/// assert_eq!(FRAMES.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// Dotted metric name, e.g. `ldlsim.gateway.datagrams_sent`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Label keys the recording sites attach.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => describe_histogram!(self.name, unit, self.description),
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metric definitions for the simulator.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Labels present on every endpoint-scoped metric.
    pub const ENDPOINT_LABELS: &[&str] = &["endpoint", "role"];

    // ========================================================================
    // Radio Medium
    // ========================================================================

    /// Transmissions started on the shared medium.
    pub const RADIO_TRANSMISSIONS: Metric = Metric::counter("ldlsim.radio.transmissions")
        .with_description("Transmissions started on the shared medium")
        .with_unit(Unit::Count)
        .with_labels(ENDPOINT_LABELS);

    /// Airtime of each transmission.
    pub const RADIO_AIRTIME: Metric = Metric::histogram("ldlsim.radio.airtime_us")
        .with_description("Airtime of each transmission in microseconds")
        .with_unit(Unit::Microseconds)
        .with_labels(ENDPOINT_LABELS);

    /// Receive attempts by outcome (`ready`, `timeout`, `collided`).
    pub const RADIO_RECEPTIONS: Metric = Metric::counter("ldlsim.radio.receptions")
        .with_description("Receive attempts by outcome")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "role", "outcome"]);

    // ========================================================================
    // Gateway Engine
    // ========================================================================

    /// Upstream datagrams sent to the network server.
    pub const GATEWAY_DATAGRAMS_SENT: Metric = Metric::counter("ldlsim.gateway.datagrams_sent")
        .with_description("Datagrams sent to the network server")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "role", "kind"]);

    /// Radio packets forwarded upstream inside PUSH_DATA.
    pub const GATEWAY_UPLINKS_FORWARDED: Metric = Metric::counter("ldlsim.gateway.uplinks_forwarded")
        .with_description("Radio packets forwarded to the network server")
        .with_unit(Unit::Count)
        .with_labels(ENDPOINT_LABELS);

    /// Radio packets heard but dropped because they collided.
    pub const GATEWAY_UPLINKS_COLLIDED: Metric = Metric::counter("ldlsim.gateway.uplinks_collided")
        .with_description("Radio packets dropped because of a collision")
        .with_unit(Unit::Count)
        .with_labels(ENDPOINT_LABELS);

    /// PULL_RESP downlink requests received, by acknowledgement result.
    pub const GATEWAY_DOWNLINKS_RECEIVED: Metric = Metric::counter("ldlsim.gateway.downlinks_received")
        .with_description("Downlink requests received from the network server")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "role", "result"]);

    /// PUSH_ACK and PULL_ACK datagrams matched to an outstanding token.
    pub const GATEWAY_ACKS_RECEIVED: Metric = Metric::counter("ldlsim.gateway.acks_received")
        .with_description("Acknowledgements received from the network server")
        .with_unit(Unit::Count)
        .with_labels(&["endpoint", "role", "kind"]);

    /// Inbound datagrams that failed to decode.
    pub const GATEWAY_DECODE_ERRORS: Metric = Metric::counter("ldlsim.gateway.decode_errors")
        .with_description("Inbound datagrams that failed to decode")
        .with_unit(Unit::Count)
        .with_labels(ENDPOINT_LABELS);

    /// Current acknowledgement ratio over the token window.
    pub const GATEWAY_ACK_RATIO: Metric = Metric::gauge("ldlsim.gateway.ack_ratio")
        .with_description("Acknowledged share of recent upstream datagrams")
        .with_unit(Unit::Percent)
        .with_labels(ENDPOINT_LABELS);

    /// All metrics, for bulk registration.
    pub const ALL: &[&Metric] = &[
        &RADIO_TRANSMISSIONS,
        &RADIO_AIRTIME,
        &RADIO_RECEPTIONS,
        &GATEWAY_DATAGRAMS_SENT,
        &GATEWAY_UPLINKS_FORWARDED,
        &GATEWAY_UPLINKS_COLLIDED,
        &GATEWAY_DOWNLINKS_RECEIVED,
        &GATEWAY_ACKS_RECEIVED,
        &GATEWAY_DECODE_ERRORS,
        &GATEWAY_ACK_RATIO,
    ];
}

/// Labels identifying one simulated endpoint.
#[derive(Debug, Clone)]
pub struct EndpointLabels {
    /// Endpoint EUI in display form.
    pub endpoint: String,
    /// `gateway` or `device`.
    pub role: &'static str,
}

impl EndpointLabels {
    pub fn new(endpoint: impl Into<String>, role: &'static str) -> Self {
        Self {
            endpoint: endpoint.into(),
            role,
        }
    }

    /// Converts the labels to the `metrics` crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("endpoint", self.endpoint.clone()), ("role", self.role.to_string())]
    }

    /// Labels plus a `kind` breakdown.
    pub fn with_kind(&self, kind: &str) -> Vec<(&'static str, String)> {
        self.with("kind", kind)
    }

    /// Labels plus one extra pair.
    pub fn with(&self, key: &'static str, value: &str) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.push((key, value.to_string()));
        labels
    }
}

/// Describes all metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
