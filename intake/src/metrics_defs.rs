//! Metrics definitions for the intake service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMISSIONS_ACCEPTED: MetricDef = MetricDef {
    name: "submissions.accepted",
    metric_type: MetricType::Counter,
    description: "Number of submissions stored",
};

pub const SUBMISSIONS_REJECTED: MetricDef = MetricDef {
    name: "submissions.rejected",
    metric_type: MetricType::Counter,
    description: "Number of submissions rejected. Tagged with reason.",
};

pub const SUBMISSIONS_RATE_LIMITED: MetricDef = MetricDef {
    name: "submissions.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of submissions turned away by the rate limiter",
};

pub const STORE_REQUEST_DURATION: MetricDef = MetricDef {
    name: "store.request.duration",
    metric_type: MetricType::Histogram,
    description: "Store request duration in seconds. Tagged with operation.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SUBMISSIONS_ACCEPTED,
    SUBMISSIONS_REJECTED,
    SUBMISSIONS_RATE_LIMITED,
    STORE_REQUEST_DURATION,
];
