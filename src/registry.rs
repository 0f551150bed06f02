//! Startup-built map of resource class to pool

use crate::config::{FactoryConfig, RegistryConfiguration, ServedIdentifiers};
use crate::errors::{PoolError, PoolResult};
use crate::factory::{DiscoveryError, ResourceClassId};
use crate::health::RegistryHealth;
use crate::metrics::PoolMetrics;
use crate::pool::{Leased, ResourcePool};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Every pool the process can lease from, frozen after [`build`]
///
/// Pools live in an arena in insertion order with a separate id index, so
/// lookups after startup take no locks.
///
/// [`build`]: PoolRegistry::build
pub struct PoolRegistry<R: Send + Sync + 'static> {
    pools: Vec<ResourcePool<R>>,
    index: HashMap<ResourceClassId, usize>,
    default_identifier: Option<ResourceClassId>,
}

impl<R: Send + Sync + 'static> PoolRegistry<R> {
    /// Build one pool per served resource class
    ///
    /// Factories failing `validate_configuration`, or whose provider cannot
    /// list its classes, are skipped with a warning. An empty result is a
    /// degraded registry, not an error. Invalid pool bounds, blank or
    /// duplicate identifiers and unreachable discovery endpoints abort.
    pub async fn build(config: RegistryConfiguration<R>) -> PoolResult<Self> {
        let RegistryConfiguration {
            factories,
            default_identifier,
        } = config;

        let mut pools: Vec<ResourcePool<R>> = Vec::new();
        let mut index = HashMap::new();

        for entry in factories {
            let Some(ids) = Self::served_identifiers(&entry).await? else {
                continue;
            };

            for id in ids {
                if index.contains_key(&id) {
                    return Err(PoolError::configuration(format!(
                        "resource class '{}' is served by more than one pool",
                        id
                    )));
                }

                let factory = Arc::clone(&entry.factory);
                let pool = ResourcePool::new(id.clone(), factory, entry.pool.clone())?;
                if let Some(size) = entry.pool.warmup_size {
                    match pool.warmup(size).await {
                        Ok(created) => debug!(resource_class = %id, created, "Warmed up pool"),
                        Err(e) => warn!(resource_class = %id, error = %e, "Pool warm-up failed"),
                    }
                }

                index.insert(id, pools.len());
                pools.push(pool);
            }
        }

        if pools.is_empty() {
            warn!("No resource pools could be provisioned; starting in degraded mode");
        }

        let default_identifier = Self::pick_default(default_identifier, &pools, &index);
        info!(
            pools = pools.len(),
            default = default_identifier.as_ref().map(ResourceClassId::as_str),
            "Resource pool registry ready"
        );

        Ok(Self {
            pools,
            index,
            default_identifier,
        })
    }

    /// `None` when the factory is skipped
    async fn served_identifiers(
        entry: &FactoryConfig<R>,
    ) -> PoolResult<Option<Vec<ResourceClassId>>> {
        let kind = entry.factory.kind();

        if !entry.factory.validate_configuration() {
            warn!(factory = kind, "Factory prerequisites missing, skipping");
            return Ok(None);
        }

        entry.pool.validate().map_err(|e| match e {
            PoolError::Configuration(message) => {
                PoolError::configuration(format!("factory '{}': {}", kind, message))
            }
            other => other,
        })?;

        let ids = match &entry.identifiers {
            ServedIdentifiers::Static(ids) if !ids.is_empty() => ids.clone(),
            _ => match entry.factory.discover_served_identifiers().await {
                Ok(ids) => ids,
                Err(DiscoveryError::Unsupported) => {
                    warn!(
                        factory = kind,
                        "No resource classes configured and provider cannot list them, skipping"
                    );
                    return Ok(None);
                }
                Err(DiscoveryError::Unavailable(source)) => {
                    return Err(PoolError::Discovery {
                        factory: kind.to_string(),
                        source: Arc::from(source),
                    });
                }
            },
        };

        if ids.is_empty() {
            warn!(factory = kind, "Factory serves no resource classes");
            return Ok(None);
        }
        Ok(Some(ids))
    }

    fn pick_default(
        configured: Option<ResourceClassId>,
        pools: &[ResourcePool<R>],
        index: &HashMap<ResourceClassId, usize>,
    ) -> Option<ResourceClassId> {
        if let Some(id) = configured {
            if index.contains_key(&id) {
                return Some(id);
            }
            warn!(resource_class = %id, "Configured default has no pool, falling back");
        }
        pools.first().map(|pool| pool.resource_class().clone())
    }

    /// Pool serving `id`, if any
    pub fn pool(&self, id: &str) -> Option<&ResourcePool<R>> {
        self.index.get(id).map(|&slot| &self.pools[slot])
    }

    pub fn get_pool(&self, id: &str) -> PoolResult<&ResourcePool<R>> {
        self.pool(id)
            .ok_or_else(|| PoolError::UnknownResourceClass(ResourceClassId::from(id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Resolved default, `None` when no pool exists
    pub fn default_identifier(&self) -> Option<&ResourceClassId> {
        self.default_identifier.as_ref()
    }

    /// Explicit identifier, or the default when none is given
    pub fn resolve(&self, id: Option<&str>) -> PoolResult<ResourceClassId> {
        match id {
            Some(id) => Ok(self
                .index
                .get_key_value(id)
                .map(|(known, _)| known.clone())
                .unwrap_or_else(|| ResourceClassId::from(id))),
            None => self
                .default_identifier
                .clone()
                .ok_or(PoolError::NoDefaultResource),
        }
    }

    /// Borrow from the pool serving `id`
    pub async fn borrow(&self, id: &str) -> PoolResult<Leased<R>> {
        self.get_pool(id)?.borrow().await
    }

    /// Return a lease to the pool it came from
    pub fn return_instance(&self, lease: &Leased<R>) -> PoolResult<()> {
        self.get_pool(lease.resource_class())?.return_instance(lease)
    }

    /// Resource classes in insertion order
    pub fn identifiers(&self) -> impl Iterator<Item = &ResourceClassId> {
        self.pools.iter().map(ResourcePool::resource_class)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// True when startup provisioned no pool at all
    pub fn is_degraded(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn metrics(&self) -> Vec<(ResourceClassId, PoolMetrics)> {
        self.pools
            .iter()
            .map(|pool| (pool.resource_class().clone(), pool.get_metrics()))
            .collect()
    }

    pub fn health(&self) -> RegistryHealth {
        RegistryHealth {
            degraded: self.is_degraded(),
            default_identifier: self.default_identifier.clone(),
            pools: self
                .pools
                .iter()
                .map(|pool| (pool.resource_class().clone(), pool.get_health_status()))
                .collect(),
        }
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        crate::metrics::MetricsExporter::export_prometheus(&self.metrics(), tags)
    }

    /// Drain and close every pool
    pub fn shutdown(&self) {
        for pool in &self.pools {
            pool.shutdown();
        }
        info!(pools = self.pools.len(), "Resource pool registry shut down");
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for PoolRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools)
            .field("default_identifier", &self.default_identifier)
            .finish()
    }
}
