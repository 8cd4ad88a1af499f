//! Prometheus metrics for the inventory.
//!
//! - `parkgrid_commits_total`: batches committed
//! - `parkgrid_commit_conflicts_total`: commits rejected by a concurrent writer
//! - `parkgrid_operation_duration_seconds{operation}`: end-to-end latency
//! - `parkgrid_entities_created_total{kind}`: campuses, lots and spaces created
//! - `parkgrid_log_entries_total`: occupancy events recorded
//!
//! # Example
//!
//! ```rust,no_run
//! use parkgrid_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use parkgrid_core::key::EntityKind;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure to bring up the Prometheus endpoint.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// The exporter rejected its configuration
    #[error("Cannot build Prometheus exporter: {0}")]
    Build(String),
}

/// Serves the inventory's metrics at `http://<addr>/metrics`.
///
/// Only started when `PARKGRID_METRICS_ADDR` is configured.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// A server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder and spawn its HTTP listener.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this
    /// logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("A metrics recorder is already installed; keeping it");
            return Ok(());
        }
        register_metrics();

        tokio::spawn(async move {
            // `ExporterError` implements neither `Debug` nor `Display` in 0.15.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Prometheus endpoint listening"
        );
        Ok(())
    }

    /// Handle onto the installed recorder, if this server installed it.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in the Prometheus text format; `None` before `start`.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Attach help text to every inventory metric.
pub fn register_metrics() {
    describe_counter!(
        "parkgrid_commits_total",
        "Total number of write batches committed"
    );
    describe_counter!(
        "parkgrid_commit_conflicts_total",
        "Total number of commits rejected by optimistic concurrency"
    );
    describe_histogram!(
        "parkgrid_operation_duration_seconds",
        "Time taken by inventory operations, retries included"
    );
    describe_counter!(
        "parkgrid_entities_created_total",
        "Total number of campuses, lots and spaces created"
    );
    describe_counter!(
        "parkgrid_log_entries_total",
        "Total number of occupancy events recorded"
    );
    describe_counter!(
        "parkgrid_postgres_commits_total",
        "Total number of PostgreSQL transactions committed by the entity store"
    );
    describe_counter!(
        "parkgrid_postgres_conflicts_total",
        "Total number of PostgreSQL commits rolled back on a version or lock conflict"
    );
}

/// Inventory metrics recorder.
pub struct InventoryMetrics;

impl InventoryMetrics {
    /// Record a committed batch.
    pub fn record_commit() {
        counter!("parkgrid_commits_total").increment(1);
    }

    /// Record a commit lost to a concurrent writer.
    pub fn record_conflict() {
        counter!("parkgrid_commit_conflicts_total").increment(1);
    }

    /// Record how long an operation took.
    pub fn record_operation(operation: &'static str, duration: Duration) {
        histogram!("parkgrid_operation_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    /// Record created records of one kind.
    pub fn record_created(kind: EntityKind, count: usize) {
        counter!("parkgrid_entities_created_total", "kind" => kind.as_str())
            .increment(count as u64);
    }

    /// Record an occupancy event.
    pub fn record_log_entry() {
        counter!("parkgrid_log_entries_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_inventory_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            InventoryMetrics::record_commit();
            InventoryMetrics::record_conflict();
            InventoryMetrics::record_created(EntityKind::Space, 3);
            InventoryMetrics::record_log_entry();
            InventoryMetrics::record_operation("create_lot", Duration::from_millis(3));
            counter!("parkgrid_postgres_commits_total").increment(1);
            counter!("parkgrid_postgres_conflicts_total").increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("parkgrid_commits_total"));
        assert!(rendered.contains("parkgrid_commit_conflicts_total"));
        assert!(rendered.contains("parkgrid_entities_created_total{kind=\"space\"} 3"));
        assert!(rendered.contains("parkgrid_log_entries_total"));
        assert!(rendered.contains("parkgrid_operation_duration_seconds"));
        assert!(rendered.contains("# HELP parkgrid_postgres_commits_total"));
        assert!(rendered.contains("# HELP parkgrid_postgres_conflicts_total"));
    }
}
