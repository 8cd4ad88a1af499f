//! Store reachability report.

use parkgrid_core::store::EntityStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Whether the store answered its health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The probe succeeded
    Healthy,
    /// The probe failed
    Unhealthy,
}

impl HealthStatus {
    /// `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Outcome of probing an [`EntityStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    /// `backend_name()` of the probed store
    pub backend: String,
    /// Probe result
    pub status: HealthStatus,
    /// How long the probe took
    pub latency: Duration,
    /// The store's error when unhealthy
    pub error: Option<String>,
}

impl StoreHealth {
    /// Run the store's health check and time it.
    pub async fn probe(store: &dyn EntityStore) -> Self {
        let backend = store.backend_name().to_string();
        let started = Instant::now();
        let outcome = store.health_check().await;
        let latency = started.elapsed();
        match outcome {
            Ok(()) => Self {
                backend,
                status: HealthStatus::Healthy,
                latency,
                error: None,
            },
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Store health check failed");
                Self {
                    backend,
                    status: HealthStatus::Unhealthy,
                    latency,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
