// Observability: metrics recording and the optional Prometheus exporter

pub mod metrics;

pub use metrics::{describe_all, install_prometheus, MetricName};
