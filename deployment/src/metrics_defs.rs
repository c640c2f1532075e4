//! Metrics definitions for deployment resolution and data dispatch.

use shared::metrics_defs::{MetricDef, MetricType};

pub const RESOLUTIONS: MetricDef = MetricDef {
    name: "deployment.resolutions",
    metric_type: MetricType::Counter,
    description: "Deployment method resolutions. Tagged with method, outcome.",
};

pub const LOGIN_ATTEMPTS: MetricDef = MetricDef {
    name: "session.login_attempts",
    metric_type: MetricType::Counter,
    description: "Interactive login attempts. Tagged with outcome.",
};

pub const DATA_RECORDED: MetricDef = MetricDef {
    name: "session.data.recorded",
    metric_type: MetricType::Counter,
    description: "Data handed to the active sink. Tagged with method.",
};

pub const DATA_DROPPED: MetricDef = MetricDef {
    name: "session.data.dropped",
    metric_type: MetricType::Counter,
    description: "Data refused because the session was not logged in or had completed",
};

pub const FINISH_DURATION: MetricDef = MetricDef {
    name: "session.finish.duration",
    metric_type: MetricType::Histogram,
    description: "Time to run the sink's finish sequence in seconds. Tagged with method.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RESOLUTIONS,
    LOGIN_ATTEMPTS,
    DATA_RECORDED,
    DATA_DROPPED,
    FINISH_DURATION,
];
