//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time counters for one pool
///
/// # Examples
///
/// ```
/// use scoped_lease::PoolMetrics;
///
/// let metrics = PoolMetrics::default();
/// let exported = metrics.export();
/// assert_eq!(exported["active_instances"], "0");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Successful borrows
    pub total_borrowed: usize,

    /// Instances handed back through `return_instance`
    pub total_returned: usize,

    /// Instances built by the factory
    pub total_created: usize,

    /// Instances destroyed (invalid, idle overflow, shutdown)
    pub total_destroyed: usize,

    /// Idle instances rejected by `is_valid`
    pub validation_failures: usize,

    /// Borrows that timed out waiting for capacity
    pub exhausted_events: usize,

    /// Returns rejected because the lease was not outstanding
    pub return_failures: usize,

    /// Currently leased instances
    pub active_instances: usize,

    /// Currently idle instances
    pub idle_instances: usize,

    /// Configured active bound
    pub max_active: usize,

    /// Leased share of the active bound (0.0 to 1.0)
    pub utilization: f64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_borrowed".to_string(), self.total_borrowed.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("return_failures".to_string(), self.return_failures.to_string());
        metrics.insert("active_instances".to_string(), self.active_instances.to_string());
        metrics.insert("idle_instances".to_string(), self.idle_instances.to_string());
        metrics.insert("max_active".to_string(), self.max_active.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics
    }
}

/// Prometheus exposition of every pool in a registry
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Render the given per-pool snapshots in Prometheus text format
    ///
    /// `tags` become constant labels on every series.
    ///
    /// # Examples
    ///
    /// ```
    /// use scoped_lease::{MetricsExporter, PoolMetrics, ResourceClassId};
    /// use std::collections::HashMap;
    ///
    /// let pools = vec![(ResourceClassId::from("fast"), PoolMetrics::default())];
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pools, Some(&tags)).unwrap();
    /// assert!(output.contains("lease_pool_instances_active"));
    /// assert!(output.contains("pool=\"fast\""));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        pools: &[(crate::ResourceClassId, PoolMetrics)],
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

        let registry = match tags {
            Some(tags) => Registry::new_custom(None, Some(tags.clone()))?,
            None => Registry::new(),
        };

        let gauge = |name: &str, help: &str| -> Result<IntGaugeVec, prometheus::Error> {
            let vec = IntGaugeVec::new(Opts::new(name, help), &["pool"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };
        let counter = |name: &str, help: &str| -> Result<IntCounterVec, prometheus::Error> {
            let vec = IntCounterVec::new(Opts::new(name, help), &["pool"])?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let active = gauge("lease_pool_instances_active", "Currently leased instances")?;
        let idle = gauge("lease_pool_instances_idle", "Currently idle instances")?;
        let max_active = gauge("lease_pool_max_active", "Configured active bound")?;
        let borrowed = counter("lease_pool_borrowed_total", "Successful borrows")?;
        let returned = counter("lease_pool_returned_total", "Instances returned")?;
        let created = counter("lease_pool_created_total", "Instances created")?;
        let destroyed = counter("lease_pool_destroyed_total", "Instances destroyed")?;
        let exhausted = counter("lease_pool_exhausted_total", "Borrows that timed out")?;
        let invalid = counter("lease_pool_validation_failures_total", "Invalid idle instances")?;
        let rejected = counter("lease_pool_return_failures_total", "Rejected returns")?;

        for (id, metrics) in pools {
            let labels = [id.as_str()];
            active.with_label_values(&labels).set(metrics.active_instances as i64);
            idle.with_label_values(&labels).set(metrics.idle_instances as i64);
            max_active.with_label_values(&labels).set(metrics.max_active as i64);
            borrowed.with_label_values(&labels).inc_by(metrics.total_borrowed as u64);
            returned.with_label_values(&labels).inc_by(metrics.total_returned as u64);
            created.with_label_values(&labels).inc_by(metrics.total_created as u64);
            destroyed.with_label_values(&labels).inc_by(metrics.total_destroyed as u64);
            exhausted.with_label_values(&labels).inc_by(metrics.exhausted_events as u64);
            invalid.with_label_values(&labels).inc_by(metrics.validation_failures as u64);
            rejected.with_label_values(&labels).inc_by(metrics.return_failures as u64);
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_borrowed: AtomicUsize,
    pub total_returned: AtomicUsize,
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub return_failures: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, active: usize, idle: usize, max_active: usize) -> PoolMetrics {
        let utilization = if max_active > 0 {
            active as f64 / max_active as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_borrowed: self.total_borrowed.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            exhausted_events: self.exhausted_events.load(Ordering::Relaxed),
            return_failures: self.return_failures.load(Ordering::Relaxed),
            active_instances: active,
            idle_instances: idle,
            max_active,
            utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_utilization() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.total_borrowed);
        MetricsTracker::bump(&tracker.total_borrowed);

        let metrics = tracker.get_metrics(1, 3, 4);
        assert_eq!(metrics.total_borrowed, 2);
        assert_eq!(metrics.utilization, 0.25);
        assert_eq!(metrics.export()["utilization"], "0.25");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_counters_per_pool() {
        let tracker = MetricsTracker::new();
        MetricsTracker::bump(&tracker.exhausted_events);
        let pools = vec![
            (crate::ResourceClassId::from("fast"), tracker.get_metrics(1, 0, 1)),
            (crate::ResourceClassId::from("slow"), PoolMetrics::default()),
        ];

        let output = MetricsExporter::export_prometheus(&pools, None).unwrap();
        assert!(output.contains("lease_pool_exhausted_total{pool=\"fast\"} 1"));
        assert!(output.contains("lease_pool_instances_active{pool=\"fast\"} 1"));
        assert!(output.contains("lease_pool_instances_active{pool=\"slow\"} 0"));
    }
}
