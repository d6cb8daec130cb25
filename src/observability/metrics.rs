//! Metric names and recording helpers for the sync pipeline.
//!
//! Recording is a no-op until a recorder is installed, so library code can call these freely.

use std::fmt;
use std::net::SocketAddr;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Fetch
    PagesFetched,
    FetchErrors,
    FetchDuration,
    ItemsFetched,

    // Items
    ItemsProcessed,
    ItemsCleaned,

    // Queue
    JobsExecuted,
    JobsEnqueued,

    // Runs
    RunsCompleted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::PagesFetched => "pullsync_pages_fetched_total",
            MetricName::FetchErrors => "pullsync_fetch_errors_total",
            MetricName::FetchDuration => "pullsync_fetch_duration_seconds",
            MetricName::ItemsFetched => "pullsync_items_fetched_total",
            MetricName::ItemsProcessed => "pullsync_items_processed_total",
            MetricName::ItemsCleaned => "pullsync_items_cleaned_total",
            MetricName::JobsExecuted => "pullsync_jobs_executed_total",
            MetricName::JobsEnqueued => "pullsync_jobs_enqueued_total",
            MetricName::RunsCompleted => "pullsync_runs_completed_total",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricName::PagesFetched => "Pages fetched and parsed",
            MetricName::FetchErrors => "Page fetches that failed",
            MetricName::FetchDuration => "Fetch and parse duration",
            MetricName::ItemsFetched => "Items produced by parsers",
            MetricName::ItemsProcessed => "Items processed, labelled by outcome",
            MetricName::ItemsCleaned => "Stale records removed by cleanup",
            MetricName::JobsExecuted => "Queue jobs executed, labelled by operation",
            MetricName::JobsEnqueued => "Queue jobs created",
            MetricName::RunsCompleted => "Runs that reached their end job",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            PagesFetched,
            FetchErrors,
            FetchDuration,
            ItemsFetched,
            ItemsProcessed,
            ItemsCleaned,
            JobsExecuted,
            JobsEnqueued,
            RunsCompleted,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers descriptions with whatever recorder is installed. Safe to call repeatedly.
pub fn describe_all() {
    DESCRIBED.get_or_init(|| {
        for metric in MetricName::all_metrics() {
            match metric {
                MetricName::FetchDuration => {
                    ::metrics::describe_histogram!(metric.as_str(), metric.description());
                }
                _ => {
                    ::metrics::describe_counter!(metric.as_str(), metric.description());
                }
            }
        }
    });
}

/// Installs the Prometheus recorder with an HTTP scrape endpoint on `addr`.
pub fn install_prometheus(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| SyncError::Config(format!("invalid metrics_addr '{}': {}", addr, e)))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SyncError::Config(format!("failed to install Prometheus exporter: {}", e)))?;
    describe_all();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub mod fetch {
    use super::MetricName;

    pub fn page_fetched(resource: &str, items: usize, secs: f64) {
        ::metrics::counter!(MetricName::PagesFetched.as_str(), "resource" => resource.to_string())
            .increment(1);
        ::metrics::counter!(MetricName::ItemsFetched.as_str(), "resource" => resource.to_string())
            .increment(items as u64);
        ::metrics::histogram!(MetricName::FetchDuration.as_str(), "resource" => resource.to_string())
            .record(secs);
    }

    pub fn fetch_error(resource: &str) {
        ::metrics::counter!(MetricName::FetchErrors.as_str(), "resource" => resource.to_string())
            .increment(1);
    }
}

pub mod items {
    use super::MetricName;

    pub fn processed(resource: &str, outcome: &'static str) {
        ::metrics::counter!(
            MetricName::ItemsProcessed.as_str(),
            "resource" => resource.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    pub fn cleaned(resource: &str) {
        ::metrics::counter!(MetricName::ItemsCleaned.as_str(), "resource" => resource.to_string())
            .increment(1);
    }
}

pub mod queue {
    use super::MetricName;

    pub fn job_enqueued(resource: &str) {
        ::metrics::counter!(MetricName::JobsEnqueued.as_str(), "resource" => resource.to_string())
            .increment(1);
    }

    pub fn job_executed(resource: &str, op: &'static str) {
        ::metrics::counter!(
            MetricName::JobsExecuted.as_str(),
            "resource" => resource.to_string(),
            "op" => op
        )
        .increment(1);
    }

    pub fn run_completed(resource: &str) {
        ::metrics::counter!(MetricName::RunsCompleted.as_str(), "resource" => resource.to_string())
            .increment(1);
    }
}
