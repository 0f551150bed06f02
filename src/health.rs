//! Health snapshots for pools and the registry

use crate::factory::ResourceClassId;
use crate::metrics::PoolMetrics;

/// Health status of one resource pool
///
/// # Examples
///
/// ```
/// use scoped_lease::{HealthStatus, PoolMetrics};
///
/// let metrics = PoolMetrics {
///     active_instances: 1,
///     max_active: 4,
///     utilization: 0.25,
///     ..Default::default()
/// };
/// let health = HealthStatus::from_metrics(&metrics);
/// assert!(health.is_healthy());
/// assert_eq!(health.utilization, 0.25);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    /// Idle instances count
    pub idle_instances: usize,

    /// Leased instances count
    pub active_instances: usize,

    /// Active bound
    pub max_active: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn from_metrics(metrics: &PoolMetrics) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if metrics.utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", metrics.utilization * 100.0));
            is_healthy = false;
        }

        if metrics.exhausted_events > 0 {
            warnings.push(format!(
                "{} borrow(s) timed out waiting for capacity",
                metrics.exhausted_events
            ));
        }

        if metrics.return_failures > 0 {
            warnings.push(format!("{} rejected return(s)", metrics.return_failures));
        }

        Self {
            is_healthy,
            utilization: metrics.utilization,
            idle_instances: metrics.idle_instances,
            active_instances: metrics.active_instances,
            max_active: metrics.max_active,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Health of every pool plus the startup outcome
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RegistryHealth {
    /// True when no pool could be provisioned at startup
    pub degraded: bool,

    pub default_identifier: Option<ResourceClassId>,

    pub pools: Vec<(ResourceClassId, HealthStatus)>,
}

impl RegistryHealth {
    /// Healthy when not degraded and every pool is healthy
    pub fn is_healthy(&self) -> bool {
        !self.degraded && self.pools.iter().all(|(_, status)| status.is_healthy())
    }
}
